//! HTTP server.
//!
//! Exposes the engine as a small JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/query` | Answer a natural-language keybinding question |
//! | `POST` | `/index/update` | Sync the index against a full record snapshot |
//! | `POST` | `/index/rebuild-hashes` | Recompute fingerprints without re-embedding |
//! | `GET`  | `/health` | Component health and version |
//! | `GET`  | `/stats` | Index size, fingerprint count, last sync |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "dependency", "message": "index error: connection refused" } }
//! ```
//!
//! Error codes: `bad_request` (400), `dependency` (502), `internal` (500).
//! `POST /query` never uses them: its outcome is reported in the
//! response body.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::engine::{EngineStats, Engine, HealthReport};
use crate::error::KeysenseError;
use crate::models::{KeybindingRecord, QueryResponse, SyncReport};

/// Build the router; split out so handlers can be exercised without a socket.
pub fn router(engine: Arc<Engine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/query", post(handle_query))
        .route("/index/update", post(handle_update))
        .route("/index/rebuild-hashes", post(handle_rebuild_hashes))
        .route("/health", get(handle_health))
        .route("/stats", get(handle_stats))
        .layer(cors)
        .with_state(engine)
}

/// Serve on `[server].bind` until the process is terminated.
pub async fn run_server(engine: Arc<Engine>) -> anyhow::Result<()> {
    let bind_addr = engine.config().server.bind.clone();
    let app = router(engine);

    info!(addr = %bind_addr, "keysense server listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

/// Map a sync failure to a response: backend failures become 502,
/// anything else 500.
fn classify_sync_error(err: anyhow::Error) -> AppError {
    let message = format!("{:#}", err);
    error!(error = %message, "Index operation failed");
    match err.downcast_ref::<KeysenseError>() {
        Some(KeysenseError::Dependency { .. }) => AppError {
            status: StatusCode::BAD_GATEWAY,
            code: "dependency".to_string(),
            message,
        },
        _ => AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal".to_string(),
            message,
        },
    }
}

// ============ POST /query ============

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    /// Include the analysed query in the response.
    #[serde(default)]
    pub explain: bool,
}

pub async fn handle_query(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<QueryRequest>,
) -> Json<QueryResponse> {
    let mut response = engine.query(&req.query).await;
    if !req.explain {
        response.processed = None;
    }
    Json(response)
}

// ============ POST /index/update ============

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    pub records: Vec<KeybindingRecord>,
    /// Re-embed everything instead of diffing against fingerprints.
    #[serde(default)]
    pub full: bool,
}

pub async fn handle_update(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<UpdateRequest>,
) -> Result<Json<SyncReport>, AppError> {
    if let Some(bad) = req.records.iter().find(|r| r.id.trim().is_empty()) {
        return Err(bad_request(format!(
            "record with keys '{}' has an empty id",
            bad.keys
        )));
    }
    let report = if req.full {
        engine.index_all(&req.records).await
    } else {
        engine.update_index(&req.records).await
    }
    .map_err(classify_sync_error)?;
    Ok(Json(report))
}

// ============ POST /index/rebuild-hashes ============

#[derive(Debug, Deserialize)]
pub struct RebuildRequest {
    pub records: Vec<KeybindingRecord>,
}

#[derive(Debug, Serialize)]
pub struct RebuildResponse {
    pub fingerprints: usize,
}

pub async fn handle_rebuild_hashes(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<RebuildRequest>,
) -> Result<Json<RebuildResponse>, AppError> {
    let fingerprints = engine
        .rebuild_hash_store(&req.records)
        .await
        .map_err(classify_sync_error)?;
    Ok(Json(RebuildResponse { fingerprints }))
}

// ============ GET /health, GET /stats ============

pub async fn handle_health(State(engine): State<Arc<Engine>>) -> Json<HealthReport> {
    Json(engine.health().await)
}

pub async fn handle_stats(
    State(engine): State<Arc<Engine>>,
) -> Result<Json<EngineStats>, AppError> {
    let stats = engine.stats().await.map_err(classify_sync_error)?;
    Ok(Json(stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::hash_store::MemoryHashStore;
    use crate::index::memory::InMemoryIndex;
    use crate::models::QueryOutcome;
    use crate::testing::FakeInference;

    fn engine() -> Arc<Engine> {
        let fake = FakeInference::new();
        let index = Arc::new(InMemoryIndex::new(fake.emitter()));
        let mut config = Config::default();
        config.retrieval.similarity_threshold = 0.1;
        Arc::new(
            Engine::with_components(
                config,
                fake,
                index,
                Arc::new(MemoryHashStore::new()),
            )
            .unwrap(),
        )
    }

    fn update(records: Vec<KeybindingRecord>) -> Json<UpdateRequest> {
        Json(UpdateRequest {
            records,
            full: false,
        })
    }

    #[tokio::test]
    async fn test_update_then_query() {
        let engine = engine();
        let Json(report) = handle_update(
            State(engine.clone()),
            update(vec![KeybindingRecord::new("n:dd", "dd", "delete line", "n")]),
        )
        .await
        .unwrap();
        assert_eq!(report.changed_count, 1);

        let Json(response) = handle_query(
            State(engine.clone()),
            Json(QueryRequest {
                query: "delete line".to_string(),
                explain: false,
            }),
        )
        .await;
        assert_eq!(response.outcome, QueryOutcome::Degraded);
        assert!(response.processed.is_none());
        assert_eq!(response.results[0].keybinding.keys, "dd");
    }

    #[tokio::test]
    async fn test_empty_id_is_bad_request() {
        let engine = engine();
        let err = handle_update(
            State(engine),
            update(vec![KeybindingRecord::new(" ", "dd", "delete line", "n")]),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "bad_request");
    }

    #[test]
    fn test_dependency_errors_map_to_502() {
        let err: anyhow::Error = KeysenseError::dependency("chroma", "connection refused").into();
        let app = classify_sync_error(err);
        assert_eq!(app.status, StatusCode::BAD_GATEWAY);
        assert_eq!(app.code, "dependency");

        let app = classify_sync_error(anyhow::anyhow!("disk full"));
        assert_eq!(app.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_stats_and_health_handlers() {
        let engine = engine();
        let Json(stats) = handle_stats(State(engine.clone())).await.unwrap();
        assert_eq!(stats.documents, 0);
        let Json(health) = handle_health(State(engine)).await;
        assert_eq!(health.status, "ok");
    }
}
