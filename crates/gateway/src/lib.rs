//! WebSocket gateway for Kindred.
//!
//! One socket per client: tagged JSON commands in, every event the
//! pipelines produce back out through the client's sink, in order. The
//! gateway owns the session registries, so cancels keep working across
//! reconnects, and hands everything else to the container's engines.

pub mod connection;
pub mod sessions;
pub mod turn;

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use kindred_config::AppConfig;
use kindred_container::Container;

use crate::sessions::Sessions;

/// Everything a connection needs: the wired collaborators and the
/// registries that outlive any single socket.
pub struct AppState {
    pub container: Arc<Container>,
    pub sessions: Sessions,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(container: Container) -> SharedState {
        Arc::new(Self {
            container: Arc::new(container),
            sessions: Sessions::default(),
        })
    }
}

/// Build the gateway router.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(connection::ws_handler))
        // Local-first deployment: the client is a desktop shell served
        // from its own origin.
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Wire the production container and serve until shutdown.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let host = config.gateway.host.clone();
    let port = config.gateway.port;

    let state = AppState::new(Container::production(config)?);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(format!("{host}:{port}")).await?;
    info!(addr = %listener.local_addr()?, "gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_router() -> Router {
        router(AppState::new(Container::for_tests()))
    }

    #[tokio::test]
    async fn health_reports_ok_and_version() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn ws_route_rejects_a_plain_get_without_unrouting() {
        let response = test_router()
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_ne!(response.status(), StatusCode::NOT_FOUND);
    }
}
