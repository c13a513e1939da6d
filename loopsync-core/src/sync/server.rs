//! The sync protocol contract shared by the HTTP client and the sync store.

use crate::sync::models::SyncData;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Protocol-level failures of a sync server.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    #[error("Sync key not found")]
    KeyNotFound,

    #[error("Edit conflict: the stored version has moved on")]
    EditConflict,

    #[error("Sync service unavailable")]
    ServiceUnavailable,

    #[error("Transport error: {0}")]
    Transport(String),
}

impl ServerError {
    /// Whether retrying later may succeed without any change on our side.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ServiceUnavailable)
    }
}

pub type ServerResult<T> = std::result::Result<T, ServerError>;

/// A store of versioned opaque payloads addressed by sync key.
///
/// `put` succeeds only when `data.version` is exactly one more than the
/// stored version; anything else is an [`ServerError::EditConflict`].
#[async_trait]
pub trait SyncServer: Send + Sync {
    /// Allocate a fresh sync key seeded with `{version: 0, content: ""}`.
    async fn register(&self) -> ServerResult<String>;

    async fn put(&self, key: &str, data: &SyncData) -> ServerResult<()>;

    async fn get_data(&self, key: &str) -> ServerResult<SyncData>;

    async fn get_data_version(&self, key: &str) -> ServerResult<i64>;
}

#[async_trait]
impl<T: SyncServer + ?Sized> SyncServer for Arc<T> {
    async fn register(&self) -> ServerResult<String> {
        (**self).register().await
    }

    async fn put(&self, key: &str, data: &SyncData) -> ServerResult<()> {
        (**self).put(key, data).await
    }

    async fn get_data(&self, key: &str) -> ServerResult<SyncData> {
        (**self).get_data(key).await
    }

    async fn get_data_version(&self, key: &str) -> ServerResult<i64> {
        (**self).get_data_version(key).await
    }
}
