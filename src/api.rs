//! REST API server
//!
//! One conversational turn per request against a dataset record, with
//! memory persisted per session between turns.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::agent::{index_document, Backends, Orchestrator};
use crate::dataset::ConvFinQARecord;
use crate::execution::ExecutionConfig;
use crate::memory::SessionMemoryStore;
use crate::retrieval::HybridIndex;

/// =============================
/// Request / Response Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatRequest {
    pub session_id: Option<String>,
    pub record_id: String,
    pub question: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

type IndexCell = Arc<OnceCell<Arc<HybridIndex>>>;
type SessionLock = Arc<Mutex<()>>;

#[derive(Clone)]
pub struct ApiState {
    records: Arc<HashMap<String, ConvFinQARecord>>,
    backends: Backends,
    config: ExecutionConfig,
    store: Arc<SessionMemoryStore>,
    indexes: Arc<Mutex<HashMap<String, IndexCell>>>,
    sessions: Arc<Mutex<HashMap<String, SessionLock>>>,
}

impl ApiState {
    pub fn new(
        records: HashMap<String, ConvFinQARecord>,
        backends: Backends,
        config: ExecutionConfig,
        store: SessionMemoryStore,
    ) -> Self {
        Self {
            records: Arc::new(records),
            backends,
            config,
            store: Arc::new(store),
            indexes: Arc::new(Mutex::new(HashMap::new())),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Lock held for a whole turn so turns of one session run one at a time
    async fn session_lock(&self, session_id: &str) -> SessionLock {
        let mut sessions = self.sessions.lock().await;
        sessions.entry(session_id.to_string()).or_default().clone()
    }

    /// The record's index, built on first use and shared afterwards
    async fn index_for(&self, record: &ConvFinQARecord) -> crate::Result<Arc<HybridIndex>> {
        let cell = {
            let mut indexes = self.indexes.lock().await;
            indexes.entry(record.id.clone()).or_default().clone()
        };

        let index = cell
            .get_or_try_init(|| async {
                index_document(&record.id, &record.doc, self.backends.embedder.clone())
                    .await
                    .map(Arc::new)
            })
            .await?;

        Ok(index.clone())
    }
}

/// =============================
/// Helpers
/// =============================

fn stable_uuid_from_string(input: &str) -> uuid::Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    uuid::Uuid::from_bytes(bytes)
}

/// Session key: a UUID as given, a stable UUID for any other string, or
/// a fresh one when absent
fn session_key(value: Option<&str>) -> uuid::Uuid {
    match value {
        Some(v) if !v.trim().is_empty() => {
            uuid::Uuid::parse_str(v.trim()).unwrap_or_else(|_| stable_uuid_from_string(v.trim()))
        }
        _ => uuid::Uuid::new_v4(),
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Chat Endpoint
/// =============================

async fn chat_handler(
    State(state): State<ApiState>,
    Json(req): Json<ChatRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let Some(record) = state.records.get(&req.record_id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("Unknown record: {}", req.record_id))),
        );
    };

    if req.question.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Question must not be empty".into())),
        );
    }

    let session_id = session_key(req.session_id.as_deref()).to_string();
    info!(session_id = %session_id, record_id = %record.id, "Received chat turn");

    let session = state.session_lock(&session_id).await;
    let _turn_guard = session.lock().await;

    let memory = match state.store.load(&session_id).await {
        Ok(memory) => memory,
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "Failed to load session memory");
            Default::default()
        }
    };

    let index = match state.index_for(record).await {
        Ok(index) => index,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(format!("Failed to index record: {}", e))),
            )
        }
    };

    let orchestrator = Orchestrator::new(state.backends.model.clone(), index, state.config.clone());
    let turn = orchestrator.run(&req.question, memory).await;

    if let Err(e) = state.store.save(&session_id, &turn.memory).await {
        warn!(session_id = %session_id, error = %e, "Failed to save session memory");
    }

    let mut response = ApiResponse::success(&turn);
    if let Some(data) = response.data.as_mut() {
        data["session_id"] = serde_json::json!(session_id);
        data["record_id"] = serde_json::json!(record.id);
    }

    (StatusCode::OK, Json(response))
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat_handler))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    state: ApiState,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
