//! Sync orchestrator: pull, merge and push cycles against a sync server.
//!
//! One attempt runs strictly in order:
//! 1. Pull: when the remote version is ahead (or the local version is
//!    unknown), download the remote snapshot, decrypt it and merge it into
//!    the local store inside a single transaction.
//! 2. Push: when the local store is dirty, export and encrypt it and propose
//!    it as the next version. An edit conflict forces another pull and
//!    retries, up to [`MAX_PUSH_ATTEMPTS`] puts.
//!
//! Working state lives in a per-attempt session and reaches the preferences
//! only when the attempt succeeds.

use crate::crypto::envelope::{decrypt_string_to_file, encrypt_file_to_string};
use crate::crypto::{derive_key, Key, DATABASE_KEY_NAME};
use crate::database::LocalStore;
use crate::sync::config::{Preferences, SyncConfig};
use crate::sync::models::SyncData;
use crate::sync::server::{ServerError, SyncServer};
use crate::sync::SyncError;
use crate::DatabaseError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Puts attempted in one sync before giving up on repeated conflicts.
pub const MAX_PUSH_ATTEMPTS: u32 = 5;

/// Local version meaning "unknown": the next pull is unconditional.
pub const LOCAL_VERSION_UNKNOWN: i64 = 0;

/// What the sync manager is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Pulling,
    Pushing,
    Disabled,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pulling => "pulling",
            Self::Pushing => "pushing",
            Self::Disabled => "disabled",
        }
    }
}

/// Result of a sync call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Sync is turned off; nothing was attempted.
    Disabled,
    Completed {
        /// Local version after the attempt.
        version: i64,
        pulled: bool,
        pushed: bool,
    },
}

/// Snapshot of the sync configuration and state for display.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub enabled: bool,
    pub state: SyncState,
    pub relay_url: Option<String>,
    pub local_version: i64,
    pub dirty: bool,
    pub last_sync_at: Option<i64>,
}

struct SyncSession {
    sync_key: String,
    key: Key,
    local_version: i64,
    dirty: bool,
    force_pull: bool,
    attempts: u32,
    pulled: bool,
    pushed: bool,
}

impl SyncSession {
    fn from_config(config: &SyncConfig) -> Result<Self, SyncError> {
        let sync_key = config
            .sync_key
            .clone()
            .ok_or_else(|| SyncError::NotConfigured("missing sync key".to_string()))?;
        let encoded = config
            .encryption_key
            .as_deref()
            .ok_or_else(|| SyncError::NotConfigured("missing encryption key".to_string()))?;

        let master = Key::from_base64(encoded)?;
        let key = derive_key(&master, DATABASE_KEY_NAME)?;

        Ok(Self {
            sync_key,
            key,
            local_version: config.local_version,
            dirty: config.dirty,
            force_pull: config.local_version == LOCAL_VERSION_UNKNOWN,
            attempts: 0,
            pulled: false,
            pushed: false,
        })
    }
}

/// Drives sync for one device.
///
/// Host events are forwarded to the `on_*` triggers. Overlapping calls to
/// [`SyncManager::sync`] run one after another, never concurrently.
pub struct SyncManager<S, D, P> {
    server: S,
    db: Arc<Mutex<D>>,
    preferences: P,
    connected: AtomicBool,
    state: Mutex<SyncState>,
    /// Bumped on every local change so a finishing attempt can tell whether
    /// the store moved underneath it.
    change_epoch: AtomicU64,
    preferences_lock: Mutex<()>,
    in_flight: tokio::sync::Mutex<()>,
}

impl<S, D, P> SyncManager<S, D, P>
where
    S: SyncServer,
    D: LocalStore,
    P: Preferences,
{
    /// Create a manager. The device starts out connected.
    pub fn new(server: S, db: Arc<Mutex<D>>, preferences: P) -> Self {
        let state = match preferences.load() {
            Ok(config) if config.sync_enabled => SyncState::Idle,
            _ => SyncState::Disabled,
        };

        Self {
            server,
            db,
            preferences,
            connected: AtomicBool::new(true),
            state: Mutex::new(state),
            change_epoch: AtomicU64::new(0),
            preferences_lock: Mutex::new(()),
            in_flight: tokio::sync::Mutex::new(()),
        }
    }

    pub fn server(&self) -> &S {
        &self.server
    }

    pub fn db(&self) -> Arc<Mutex<D>> {
        self.db.clone()
    }

    pub fn preferences(&self) -> &P {
        &self.preferences
    }

    pub fn state(&self) -> SyncState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status(&self) -> Result<SyncStatus, SyncError> {
        let config = self.preferences.load()?;
        Ok(SyncStatus {
            enabled: config.sync_enabled,
            state: self.state(),
            relay_url: config.relay_url,
            local_version: config.local_version,
            dirty: config.dirty,
            last_sync_at: config.last_sync_at,
        })
    }

    // --- Triggers ---

    pub async fn on_resume(&self, cancel: &CancellationToken) -> Result<SyncOutcome, SyncError> {
        self.sync(cancel).await
    }

    pub async fn on_pause(&self, cancel: &CancellationToken) -> Result<SyncOutcome, SyncError> {
        self.sync(cancel).await
    }

    /// Record that the local store was modified.
    pub fn on_local_change(&self) -> Result<(), SyncError> {
        let config = self.update_config(|config| {
            self.change_epoch.fetch_add(1, Ordering::SeqCst);
            config.record_local_change();
        })?;
        debug!("Local change recorded (version {})", config.local_version);
        Ok(())
    }

    /// Store freshly obtained keys and start syncing with them.
    pub async fn enable_sync(
        &self,
        sync_key: String,
        master: &Key,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, SyncError> {
        let encoded = master.to_base64();
        self.update_config(move |config| {
            config.sync_key = Some(sync_key);
            config.encryption_key = Some(encoded);
        })?;
        self.on_sync_enabled(cancel).await
    }

    /// Sync was switched on: forget the local version and push everything.
    pub async fn on_sync_enabled(
        &self,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, SyncError> {
        info!("Sync enabled.");
        self.update_config(|config| {
            config.sync_enabled = true;
            config.local_version = LOCAL_VERSION_UNKNOWN;
            config.dirty = true;
        })?;
        self.set_state(SyncState::Idle);
        self.sync(cancel).await
    }

    pub async fn on_network_available(
        &self,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, SyncError> {
        info!("Network available.");
        self.connected.store(true, Ordering::SeqCst);
        self.sync(cancel).await
    }

    pub fn on_network_lost(&self) {
        info!("Network unavailable.");
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Turn sync off and clear the stored keys.
    pub fn disable_sync(&self) -> Result<(), SyncError> {
        self.update_config(SyncConfig::disable_sync)?;
        self.set_state(SyncState::Disabled);
        Ok(())
    }

    // --- Sync cycle ---

    /// Run one pull-then-push attempt.
    ///
    /// Transient failures are returned with sync still enabled. A missing
    /// sync key or any unexpected failure also disables sync and clears the
    /// keys before the error is returned.
    pub async fn sync(&self, cancel: &CancellationToken) -> Result<SyncOutcome, SyncError> {
        let _in_flight = cancellable(cancel, self.in_flight.lock()).await?;

        let config = self.preferences.load()?;
        if !config.sync_enabled {
            info!("Device sync is disabled. Skipping sync.");
            self.set_state(SyncState::Disabled);
            return Ok(SyncOutcome::Disabled);
        }

        let epoch = self.change_epoch.load(Ordering::SeqCst);
        let result = self.run_session(&config, cancel).await;

        match result {
            Ok(session) => {
                if !self.commit_session(&session, epoch)? {
                    info!("Sync was disabled during the attempt. Discarding session.");
                    self.set_state(SyncState::Disabled);
                    return Ok(SyncOutcome::Disabled);
                }
                self.set_state(SyncState::Idle);
                info!("Sync finished successfully.");
                Ok(SyncOutcome::Completed {
                    version: session.local_version,
                    pulled: session.pulled,
                    pushed: session.pushed,
                })
            }
            Err(e) => {
                self.handle_failure(&e);
                Err(e)
            }
        }
    }

    async fn run_session(
        &self,
        config: &SyncConfig,
        cancel: &CancellationToken,
    ) -> Result<SyncSession, SyncError> {
        let mut session = SyncSession::from_config(config)?;
        info!("Starting sync (key: {})", redact(&session.sync_key));

        self.pull(&mut session, cancel).await?;
        self.push(&mut session, cancel).await?;
        Ok(session)
    }

    async fn pull(
        &self,
        session: &mut SyncSession,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        self.set_state(SyncState::Pulling);
        info!("Querying remote database version...");
        self.assert_connected()?;
        let remote = cancellable(cancel, self.server.get_data_version(&session.sync_key)).await??;
        info!("Remote database version: {}", remote);
        if remote < 0 {
            return Err(SyncError::InvalidRemoteVersion(remote));
        }

        if !session.force_pull && remote <= session.local_version {
            info!("Local database is up-to-date. Skipping merge.");
            return Ok(());
        }

        info!("Pulling remote database...");
        self.assert_connected()?;
        let data = cancellable(cancel, self.server.get_data(&session.sync_key)).await??;
        info!(
            "Pulled remote database (version {}, {} KB)",
            data.version,
            data.content.len() / 1024
        );
        let next_version = next_local_version(data.version)?;

        if data.content.is_empty() {
            debug!("Remote slot holds no snapshot yet");
        } else {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            self.merge(&session.key, &data)?;
        }

        session.local_version = next_version;
        session.dirty = true;
        session.force_pull = false;
        session.pulled = true;
        info!("Setting local database version: {}", session.local_version);
        Ok(())
    }

    fn merge(&self, key: &Key, data: &SyncData) -> Result<(), SyncError> {
        info!("Decrypting remote database and merging with local changes...");
        let scratch = tempfile::Builder::new()
            .prefix("loopsync-import")
            .tempdir()?;
        let path = scratch.path().join("remote.db");
        decrypt_string_to_file(key, &data.content, &path)?;

        let mut db = self.lock_db()?;
        db.begin_transaction()
            .map_err(|e| SyncError::Import(e.to_string()))?;

        let imported = db.import_snapshot(&path).and_then(|_| db.commit());
        if let Err(e) = imported {
            error!("Failed to import database: {}", e);
            if let Err(rollback) = db.rollback() {
                error!("Rollback after failed import also failed: {}", rollback);
            }
            return Err(SyncError::Import(e.to_string()));
        }

        Ok(())
    }

    async fn push(
        &self,
        session: &mut SyncSession,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        loop {
            if session.attempts >= MAX_PUSH_ATTEMPTS {
                error!(
                    "Push still conflicting after {} attempts. Giving up until the next sync.",
                    session.attempts
                );
                return Err(SyncError::ConflictRetriesExhausted {
                    attempts: session.attempts,
                });
            }

            if !session.dirty {
                info!("Local database not modified. Skipping push.");
                return Ok(());
            }

            self.set_state(SyncState::Pushing);
            info!("Encrypting local database...");
            let content = self.encrypt_snapshot(&session.key)?;
            info!(
                "Pushing local database (version {}, {} KB)",
                session.local_version,
                content.len() / 1024
            );

            self.assert_connected()?;
            let data = SyncData {
                version: session.local_version,
                content,
            };

            match cancellable(cancel, self.server.put(&session.sync_key, &data)).await? {
                Ok(()) => {
                    session.dirty = false;
                    session.pushed = true;
                    return Ok(());
                }
                Err(ServerError::EditConflict) => {
                    info!("Sync conflict detected while pushing.");
                    session.attempts += 1;
                    session.local_version = LOCAL_VERSION_UNKNOWN;
                    session.force_pull = true;
                    self.pull(session, cancel).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn encrypt_snapshot(&self, key: &Key) -> Result<String, SyncError> {
        let scratch = tempfile::Builder::new()
            .prefix("loopsync-export")
            .tempdir()?;
        let path = scratch.path().join("local.db");
        self.lock_db()?.export_snapshot(&path)?;
        Ok(encrypt_file_to_string(key, &path)?)
    }

    // --- Session bookkeeping ---

    /// Returns false, leaving the config untouched, if sync was disabled
    /// while the attempt ran.
    fn commit_session(&self, session: &SyncSession, epoch: u64) -> Result<bool, SyncError> {
        let mut committed = false;
        let config = self.update_config(|config| {
            if !config.sync_enabled {
                return;
            }
            committed = true;
            config.local_version = session.local_version;
            config.dirty = session.dirty;
            if self.change_epoch.load(Ordering::SeqCst) != epoch {
                debug!("Local changes arrived during sync");
                config.record_local_change();
            }
            config.last_sync_at = Some(chrono::Utc::now().timestamp());
        })?;
        if committed {
            debug!(
                "Committed sync session (version {}, dirty: {})",
                config.local_version, config.dirty
            );
        }
        Ok(committed)
    }

    fn handle_failure(&self, e: &SyncError) {
        match e {
            SyncError::ConnectionLost => info!("Network unavailable. Aborting sync."),
            SyncError::Cancelled => info!("Sync cancelled."),
            SyncError::Server(ServerError::ServiceUnavailable) => {
                info!("Sync service unavailable. Aborting sync.")
            }
            SyncError::Import(_) => warn!("Remote snapshot not merged. Aborting sync."),
            SyncError::InvalidRemoteVersion(v) => {
                warn!("Server reported version {}. Aborting sync.", v)
            }
            SyncError::ConflictRetriesExhausted { .. } => {}
            SyncError::Server(ServerError::KeyNotFound) => {
                error!("Sync key no longer exists on the server. Disabling sync.")
            }
            other => error!("Unexpected sync error. Disabling sync: {}", other),
        }

        if e.is_transient() {
            let still_enabled = self
                .preferences
                .load()
                .map(|config| config.sync_enabled)
                .unwrap_or(true);
            self.set_state(if still_enabled {
                SyncState::Idle
            } else {
                SyncState::Disabled
            });
        } else if let Err(disable_err) = self.disable_sync() {
            error!("Failed to disable sync: {}", disable_err);
            self.set_state(SyncState::Disabled);
        }
    }

    fn update_config<F>(&self, apply: F) -> Result<SyncConfig, SyncError>
    where
        F: FnOnce(&mut SyncConfig),
    {
        let _guard = self
            .preferences_lock
            .lock()
            .map_err(|e| DatabaseError::LockPoisoned(e.to_string()))?;
        let mut config = self.preferences.load()?;
        apply(&mut config);
        self.preferences.save(&config)?;
        Ok(config)
    }

    fn lock_db(&self) -> Result<MutexGuard<'_, D>, SyncError> {
        self.db
            .lock()
            .map_err(|e| DatabaseError::LockPoisoned(e.to_string()).into())
    }

    fn assert_connected(&self) -> Result<(), SyncError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::ConnectionLost)
        }
    }

    fn set_state(&self, state: SyncState) {
        let mut current = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *current != state {
            debug!("Sync state: {} -> {}", current.as_str(), state.as_str());
            *current = state;
        }
    }
}

/// Version a device proposes after pulling `remote`.
fn next_local_version(remote: i64) -> Result<i64, SyncError> {
    if remote < 0 {
        return Err(SyncError::InvalidRemoteVersion(remote));
    }
    remote
        .checked_add(1)
        .ok_or(SyncError::InvalidRemoteVersion(remote))
}

/// Race `fut` against the cancellation token.
async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, SyncError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
        out = fut => Ok(out),
    }
}

fn redact(sync_key: &str) -> String {
    let prefix: String = sync_key.chars().take(8).collect();
    format!("{}...", prefix)
}
