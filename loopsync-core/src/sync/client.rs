//! HTTP sync client for communicating with the relay server.

use crate::sync::models::{
    CreateLinkRequest, PairingLink, RegisterResponse, SyncData, VersionResponse,
};
use crate::sync::server::{ServerError, ServerResult, SyncServer};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// [`SyncServer`] implementation talking to a relay over HTTP.
#[derive(Debug, Clone)]
pub struct RemoteSyncServer {
    client: reqwest::Client,
    relay_url: String,
}

impl RemoteSyncServer {
    /// Create a new client for the relay at `relay_url`.
    pub fn new(relay_url: &str) -> ServerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ServerError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            relay_url: relay_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn relay_url(&self) -> &str {
        &self.relay_url
    }

    /// Publish a pairing link for `sync_key`.
    pub async fn create_link(&self, sync_key: &str) -> ServerResult<PairingLink> {
        let body = CreateLinkRequest {
            sync_key: sync_key.to_string(),
        };
        let resp = self
            .client
            .post(self.url("/links"))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        read_json(resp).await
    }

    /// Look up a pairing link published by another device.
    pub async fn fetch_link(&self, id: &str) -> ServerResult<PairingLink> {
        let resp = self
            .client
            .get(self.url(&format!("/links/{}", id)))
            .send()
            .await
            .map_err(transport_error)?;
        read_json(resp).await
    }

    // --- Internal helpers ---

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.relay_url, path)
    }
}

#[async_trait]
impl SyncServer for RemoteSyncServer {
    async fn register(&self) -> ServerResult<String> {
        let resp = self
            .client
            .post(self.url("/register"))
            .send()
            .await
            .map_err(transport_error)?;
        let body: RegisterResponse = read_json(resp).await?;
        Ok(body.key)
    }

    async fn put(&self, key: &str, data: &SyncData) -> ServerResult<()> {
        debug!("PUT version {} ({} bytes)", data.version, data.content.len());
        let resp = self
            .client
            .put(self.url(&format!("/db/{}", key)))
            .json(data)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(resp.status())
    }

    async fn get_data(&self, key: &str) -> ServerResult<SyncData> {
        let resp = self
            .client
            .get(self.url(&format!("/db/{}", key)))
            .send()
            .await
            .map_err(transport_error)?;
        read_json(resp).await
    }

    async fn get_data_version(&self, key: &str) -> ServerResult<i64> {
        let resp = self
            .client
            .get(self.url(&format!("/db/{}/version", key)))
            .send()
            .await
            .map_err(transport_error)?;
        let body: VersionResponse = read_json(resp).await?;
        Ok(body.version)
    }
}

fn check_status(status: StatusCode) -> ServerResult<()> {
    match status {
        s if s.is_success() => Ok(()),
        StatusCode::NOT_FOUND => Err(ServerError::KeyNotFound),
        StatusCode::CONFLICT => Err(ServerError::EditConflict),
        s if s.is_server_error() => Err(ServerError::ServiceUnavailable),
        s => Err(ServerError::Transport(format!("Unexpected relay status {}", s))),
    }
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> ServerResult<T> {
    check_status(resp.status())?;
    resp.json()
        .await
        .map_err(|e| ServerError::Transport(format!("Invalid relay response: {}", e)))
}

fn transport_error(e: reqwest::Error) -> ServerError {
    if e.is_connect() || e.is_timeout() {
        debug!("Relay unreachable: {}", e);
        ServerError::ServiceUnavailable
    } else {
        ServerError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::sync::{Arc, Mutex};

    type Captured = Arc<Mutex<Vec<(String, SyncData)>>>;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn happy_router(captured: Captured) -> Router {
        Router::new()
            .route(
                "/register",
                post(|| async { Json(serde_json::json!({ "key": "abc123" })) }),
            )
            .route(
                "/db/{key}",
                get(|Path(key): Path<String>| async move {
                    Json(SyncData {
                        version: 4,
                        content: format!("content-of-{}", key),
                    })
                })
                .put(
                    |State(captured): State<Captured>,
                     Path(key): Path<String>,
                     Json(data): Json<SyncData>| async move {
                        captured.lock().unwrap().push((key, data));
                        AxumStatus::OK
                    },
                ),
            )
            .route(
                "/db/{key}/version",
                get(|| async { Json(serde_json::json!({ "version": 42 })) }),
            )
            .route(
                "/links",
                post(|Json(body): Json<serde_json::Value>| async move {
                    Json(serde_json::json!({
                        "id": "link-1",
                        "syncKey": body["syncKey"],
                        "createdAt": 1_000,
                    }))
                }),
            )
            .route(
                "/links/{id}",
                get(|Path(id): Path<String>| async move {
                    if id == "link-1" {
                        Ok(Json(serde_json::json!({
                            "id": "link-1",
                            "syncKey": "abc123",
                            "createdAt": 1_000,
                        })))
                    } else {
                        Err(AxumStatus::NOT_FOUND)
                    }
                }),
            )
            .with_state(captured)
    }

    fn status_router(status: AxumStatus) -> Router {
        Router::new()
            .route("/register", post(move || async move { status }))
            .route("/db/{key}", get(move || async move { status }).put(move || async move { status }))
            .route("/db/{key}/version", get(move || async move { status }))
    }

    #[tokio::test]
    async fn test_successful_operations() {
        let captured: Captured = Arc::default();
        let url = serve(happy_router(captured.clone())).await;
        let server = RemoteSyncServer::new(&format!("{}/", url)).unwrap();

        assert_eq!(server.register().await.unwrap(), "abc123");
        assert_eq!(server.get_data_version("abc123").await.unwrap(), 42);
        assert_eq!(
            server.get_data("abc123").await.unwrap(),
            SyncData {
                version: 4,
                content: "content-of-abc123".to_string()
            }
        );

        let data = SyncData {
            version: 5,
            content: "encrypted".to_string(),
        };
        server.put("abc123", &data).await.unwrap();
        assert_eq!(
            captured.lock().unwrap().as_slice(),
            &[("abc123".to_string(), data)]
        );
    }

    #[tokio::test]
    async fn test_not_found_maps_to_key_not_found() {
        let url = serve(status_router(AxumStatus::NOT_FOUND)).await;
        let server = RemoteSyncServer::new(&url).unwrap();

        assert_eq!(server.get_data("k").await, Err(ServerError::KeyNotFound));
        assert_eq!(
            server.get_data_version("k").await,
            Err(ServerError::KeyNotFound)
        );
        assert_eq!(
            server.put("k", &SyncData::empty()).await,
            Err(ServerError::KeyNotFound)
        );
    }

    #[tokio::test]
    async fn test_conflict_maps_to_edit_conflict() {
        let url = serve(status_router(AxumStatus::CONFLICT)).await;
        let server = RemoteSyncServer::new(&url).unwrap();

        assert_eq!(
            server.put("k", &SyncData::empty()).await,
            Err(ServerError::EditConflict)
        );
    }

    #[tokio::test]
    async fn test_server_errors_map_to_service_unavailable() {
        for status in [
            AxumStatus::INTERNAL_SERVER_ERROR,
            AxumStatus::BAD_GATEWAY,
            AxumStatus::SERVICE_UNAVAILABLE,
        ] {
            let url = serve(status_router(status)).await;
            let server = RemoteSyncServer::new(&url).unwrap();

            assert_eq!(server.register().await, Err(ServerError::ServiceUnavailable));
            assert_eq!(
                server.put("k", &SyncData::empty()).await,
                Err(ServerError::ServiceUnavailable)
            );
        }
    }

    #[tokio::test]
    async fn test_other_statuses_are_transport_errors() {
        let url = serve(status_router(AxumStatus::IM_A_TEAPOT)).await;
        let server = RemoteSyncServer::new(&url).unwrap();

        let err = server.get_data("k").await.unwrap_err();
        assert!(matches!(err, ServerError::Transport(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_malformed_body_is_transport_error() {
        let router = Router::new().route(
            "/db/{key}/version",
            get(|| async { "definitely not json" }),
        );
        let url = serve(router).await;
        let server = RemoteSyncServer::new(&url).unwrap();

        assert!(matches!(
            server.get_data_version("k").await,
            Err(ServerError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_relay_is_service_unavailable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let server = RemoteSyncServer::new(&format!("http://{}", addr)).unwrap();
        assert_eq!(
            server.get_data_version("k").await,
            Err(ServerError::ServiceUnavailable)
        );
    }

    #[tokio::test]
    async fn test_pairing_links() {
        let url = serve(happy_router(Arc::default())).await;
        let server = RemoteSyncServer::new(&url).unwrap();

        let link = server.create_link("abc123").await.unwrap();
        assert_eq!(link.id, "link-1");
        assert_eq!(link.sync_key, "abc123");

        assert_eq!(server.fetch_link("link-1").await.unwrap(), link);
        assert_eq!(
            server.fetch_link("nope").await,
            Err(ServerError::KeyNotFound)
        );
    }
}
