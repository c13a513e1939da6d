//! Axum router setup.

use crate::config::RelayConfig;
use crate::handlers::{links, sync};
use crate::storage::RelayStorage;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use loopsync_core::sync::SyncStore;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SyncStore<RelayStorage>>,
    pub storage: RelayStorage,
    pub link_ttl_secs: i64,
}

impl AppState {
    pub fn new(storage: RelayStorage, config: &RelayConfig) -> Self {
        Self {
            store: Arc::new(SyncStore::new(storage.clone())),
            storage,
            link_ttl_secs: i64::try_from(config.link_ttl_secs).unwrap_or(i64::MAX),
        }
    }
}

pub fn build_router(state: AppState, config: &RelayConfig) -> Router {
    Router::new()
        .route("/register", post(sync::register))
        .route("/db/{key}", get(sync::get_data).put(sync::put_data))
        .route("/db/{key}/version", get(sync::get_version))
        .route("/links", post(links::create_link))
        .route("/links/{id}", get(links::fetch_link))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(config.max_payload_size))
        .layer(RequestBodyLimitLayer::new(config.max_payload_size))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopsync_core::crypto::Key;
    use loopsync_core::database::SqliteStore;
    use loopsync_core::sync::{
        MemoryPreferences, RemoteSyncServer, ServerError, SyncConfig, SyncData, SyncManager,
        SyncServer,
    };
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    async fn spawn_relay(config: RelayConfig) -> (String, RelayStorage) {
        let storage = RelayStorage::in_memory().unwrap();
        let app = build_router(AppState::new(storage.clone(), &config), &config);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), storage)
    }

    fn data(version: i64, content: &str) -> SyncData {
        SyncData {
            version,
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_health() {
        let (url, _) = spawn_relay(RelayConfig::default()).await;
        let body = reqwest::get(format!("{}/health", url))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_sync_protocol_over_http() {
        let (url, _) = spawn_relay(RelayConfig::default()).await;
        let server = RemoteSyncServer::new(&url).unwrap();

        let key = server.register().await.unwrap();
        assert_eq!(key.len(), 64);
        assert_eq!(server.get_data_version(&key).await.unwrap(), 0);
        assert_eq!(server.get_data(&key).await.unwrap(), SyncData::empty());

        server.put(&key, &data(1, "A")).await.unwrap();
        assert_eq!(
            server.put(&key, &data(1, "B")).await,
            Err(ServerError::EditConflict)
        );
        assert_eq!(
            server.put(&key, &data(3, "C")).await,
            Err(ServerError::EditConflict)
        );
        assert_eq!(server.get_data(&key).await.unwrap(), data(1, "A"));
        assert_eq!(server.get_data_version(&key).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_key_is_404() {
        let (url, _) = spawn_relay(RelayConfig::default()).await;
        let server = RemoteSyncServer::new(&url).unwrap();

        assert_eq!(
            server.get_data("nope").await,
            Err(ServerError::KeyNotFound)
        );
        assert_eq!(
            server.get_data_version("nope").await,
            Err(ServerError::KeyNotFound)
        );
        assert_eq!(
            server.put("nope", &data(1, "x")).await,
            Err(ServerError::KeyNotFound)
        );
    }

    #[tokio::test]
    async fn test_oversized_payload_is_rejected() {
        let config = RelayConfig {
            max_payload_size: 1024,
            ..RelayConfig::default()
        };
        let (url, _) = spawn_relay(config).await;
        let server = RemoteSyncServer::new(&url).unwrap();
        let key = server.register().await.unwrap();

        let result = server.put(&key, &data(1, &"x".repeat(4096))).await;
        assert!(matches!(result, Err(ServerError::Transport(_))));
        assert_eq!(server.get_data_version(&key).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pairing_links() {
        let (url, storage) = spawn_relay(RelayConfig::default()).await;
        let server = RemoteSyncServer::new(&url).unwrap();
        let key = server.register().await.unwrap();

        let link = server.create_link(&key).await.unwrap();
        assert_eq!(link.sync_key, key);
        assert_eq!(server.fetch_link(&link.id).await.unwrap(), link);
        assert_eq!(server.fetch_link(&link.id).await.unwrap(), link);

        assert_eq!(
            server.create_link("unregistered").await,
            Err(ServerError::KeyNotFound)
        );
        assert_eq!(
            server.fetch_link("missing").await,
            Err(ServerError::KeyNotFound)
        );

        storage
            .conn()
            .unwrap()
            .execute("UPDATE pairing_links SET created_at = created_at - 301", [])
            .unwrap();
        assert_eq!(
            server.fetch_link(&link.id).await,
            Err(ServerError::KeyNotFound)
        );
    }

    #[tokio::test]
    async fn test_devices_converge_through_relay() {
        let (url, _) = spawn_relay(RelayConfig::default()).await;
        let master = Key::generate();
        let cancel = CancellationToken::new();

        let new_device = || {
            SyncManager::new(
                RemoteSyncServer::new(&url).unwrap(),
                Arc::new(Mutex::new(SqliteStore::in_memory().unwrap())),
                MemoryPreferences::new(SyncConfig {
                    relay_url: Some(url.clone()),
                    ..SyncConfig::default()
                }),
            )
        };
        let phone = new_device();
        let laptop = new_device();

        phone.db().lock().unwrap().put_record_at("water", "8 glasses", 1).unwrap();
        let key = phone.server().register().await.unwrap();
        phone.enable_sync(key.clone(), &master, &cancel).await.unwrap();

        let link = phone.server().create_link(&key).await.unwrap();
        let joined = laptop.server().fetch_link(&link.id).await.unwrap();
        laptop.db().lock().unwrap().put_record_at("run", "5 km", 2).unwrap();
        laptop
            .enable_sync(joined.sync_key, &master, &cancel)
            .await
            .unwrap();

        phone.sync(&cancel).await.unwrap();

        for device in [&phone, &laptop] {
            let db = device.db();
            let db = db.lock().unwrap();
            assert_eq!(db.get_record("water").unwrap().unwrap().body, "8 glasses");
            assert_eq!(db.get_record("run").unwrap().unwrap().body, "5 km");
        }
    }
}
