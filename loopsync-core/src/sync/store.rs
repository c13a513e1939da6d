//! Server-side sync store enforcing optimistic concurrency.
//!
//! The store never decrypts anything. It keeps one [`SyncData`] per sync key
//! and accepts a `put` only when it advances the stored version by exactly
//! one. Concurrent puts to the same key are serialized by a per-key lock, so
//! the version check and the write happen atomically; different keys never
//! contend.

use crate::sync::models::SyncData;
use crate::sync::server::{ServerError, ServerResult, SyncServer};
use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Length of a generated sync key.
pub const SYNC_KEY_LENGTH: usize = 64;

/// Registration gives up after this many colliding keys.
const MAX_REGISTER_ATTEMPTS: usize = 16;

/// Failure of the storage behind a [`SyncStore`].
#[derive(Error, Debug)]
#[error("Repository error: {0}")]
pub struct RepositoryError(pub String);

/// Persistence used by [`SyncStore`].
///
/// Implementations only need to be individually atomic. The store holds the
/// per-key lock around the read-check-write sequence of a `put`.
pub trait SyncRepository: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<SyncData>, RepositoryError>;

    /// Store `data` under `key` unless the key already exists.
    ///
    /// Returns `false` without writing when the key is taken.
    fn insert_if_absent(&self, key: &str, data: &SyncData) -> Result<bool, RepositoryError>;

    fn update(&self, key: &str, data: &SyncData) -> Result<(), RepositoryError>;
}

/// In-process repository, used by tests and embedded servers.
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    entries: Arc<Mutex<HashMap<String, SyncData>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, SyncData>>, RepositoryError> {
        self.entries
            .lock()
            .map_err(|e| RepositoryError(format!("lock poisoned: {}", e)))
    }
}

impl SyncRepository for MemoryRepository {
    fn get(&self, key: &str) -> Result<Option<SyncData>, RepositoryError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn insert_if_absent(&self, key: &str, data: &SyncData) -> Result<bool, RepositoryError> {
        let mut entries = self.lock()?;
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), data.clone());
        Ok(true)
    }

    fn update(&self, key: &str, data: &SyncData) -> Result<(), RepositoryError> {
        self.lock()?.insert(key.to_string(), data.clone());
        Ok(())
    }
}

type KeyGenerator = Box<dyn Fn() -> String + Send + Sync>;

/// Generate a random 64-character alphanumeric sync key.
pub fn generate_sync_key() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(SYNC_KEY_LENGTH)
        .map(char::from)
        .collect()
}

/// A [`SyncServer`] backed by a [`SyncRepository`].
pub struct SyncStore<R> {
    repository: R,
    key_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    generate_key: KeyGenerator,
}

impl<R: SyncRepository> SyncStore<R> {
    pub fn new(repository: R) -> Self {
        Self::with_key_generator(repository, Box::new(generate_sync_key))
    }

    /// Use a custom key generator instead of [`generate_sync_key`].
    pub fn with_key_generator(repository: R, generate_key: KeyGenerator) -> Self {
        Self {
            repository,
            key_locks: Mutex::new(HashMap::new()),
            generate_key,
        }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    fn key_lock(&self, key: &str) -> ServerResult<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self.key_locks.lock().map_err(|e| {
            error!("Key lock table poisoned: {}", e);
            ServerError::ServiceUnavailable
        })?;
        Ok(locks.entry(key.to_string()).or_default().clone())
    }

    /// Drop lock entries nobody is holding or waiting on.
    fn prune_key_locks(&self) {
        if let Ok(mut locks) = self.key_locks.lock() {
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
    }

    fn load(&self, key: &str) -> ServerResult<SyncData> {
        match self.repository.get(key) {
            Ok(Some(data)) => Ok(data),
            Ok(None) => Err(ServerError::KeyNotFound),
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn put_locked(&self, key: &str, data: &SyncData) -> ServerResult<()> {
        let lock = self.key_lock(key)?;
        let _guard = lock.lock().await;

        let stored = self.load(key)?;
        if data.version != stored.version + 1 {
            debug!(
                "Rejecting put: stored version {}, proposed {}",
                stored.version, data.version
            );
            return Err(ServerError::EditConflict);
        }

        self.repository.update(key, data).map_err(unavailable)?;
        debug!("Stored version {} ({} bytes)", data.version, data.content.len());
        Ok(())
    }
}

fn unavailable(e: RepositoryError) -> ServerError {
    error!("Sync repository failure: {}", e);
    ServerError::ServiceUnavailable
}

#[async_trait]
impl<R: SyncRepository> SyncServer for SyncStore<R> {
    async fn register(&self) -> ServerResult<String> {
        for _ in 0..MAX_REGISTER_ATTEMPTS {
            let key = (self.generate_key)();
            if self
                .repository
                .insert_if_absent(&key, &SyncData::empty())
                .map_err(unavailable)?
            {
                info!("Registered new sync key");
                return Ok(key);
            }
            warn!("Generated sync key already exists, retrying");
        }

        error!(
            "Could not allocate a sync key after {} attempts",
            MAX_REGISTER_ATTEMPTS
        );
        Err(ServerError::ServiceUnavailable)
    }

    async fn put(&self, key: &str, data: &SyncData) -> ServerResult<()> {
        let result = self.put_locked(key, data).await;
        self.prune_key_locks();
        result
    }

    async fn get_data(&self, key: &str) -> ServerResult<SyncData> {
        self.load(key)
    }

    async fn get_data_version(&self, key: &str) -> ServerResult<i64> {
        self.load(key).map(|data| data.version)
    }
}
