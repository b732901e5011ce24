//! REST API Server for the trading cycle orchestrator
//!
//! Exposes cycle runs, the provider registry and the audit archive over HTTP

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::Orchestrator;
use crate::models::{ProviderCategory, Security};

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct CycleRequest {
    /// Defaults to the configured security list
    #[serde(default)]
    pub securities: Option<Vec<String>>,
}

/// =============================
/// Response Wrapper
/// =============================

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

#[derive(Debug, Serialize)]
struct ProviderInfo {
    name: String,
    intelligence_type: String,
    description: String,
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    /// Parent of every cycle started through the API
    pub shutdown: CancellationToken,
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
/// Provider Listing
/// =============================

async fn list_providers(State(state): State<ApiState>) -> Json<ApiResponse> {
    let registry = state.orchestrator.registry();
    let registry = registry.read().await;

    let describe = |category: ProviderCategory| -> Vec<ProviderInfo> {
        registry
            .by_category(category)
            .iter()
            .map(|p| ProviderInfo {
                name: p.name().to_string(),
                intelligence_type: p.intelligence_type().to_string(),
                description: p.description(),
            })
            .collect()
    };

    Json(ApiResponse::success(serde_json::json!({
        "data": describe(ProviderCategory::Data),
        "inference": describe(ProviderCategory::Inference),
        "enabled": state.orchestrator.config().enabled_providers,
    })))
}

/// =============================
/// Cycle Endpoints
/// =============================

async fn run_cycles(
    State(state): State<ApiState>,
    Json(req): Json<CycleRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let securities: Vec<Security> = match req.securities {
        Some(symbols) => symbols.iter().map(Security::new).collect(),
        None => state.orchestrator.config().securities.clone(),
    };

    if securities.is_empty() || securities.iter().any(|s| s.as_str().is_empty()) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("securities must be non-empty symbols".into())),
        );
    }

    info!(securities = ?securities, "Received cycle request");

    let results = state
        .orchestrator
        .run_basket(securities.clone(), &state.shutdown)
        .await;

    let body: Vec<serde_json::Value> = securities
        .iter()
        .zip(results)
        .map(|(security, result)| match result {
            Ok(snapshot) => serde_json::to_value(snapshot).unwrap_or_default(),
            Err(e) => {
                warn!(security = %security, error = %e, "Cycle could not run");
                serde_json::json!({ "security": security, "error": e.to_string() })
            }
        })
        .collect();

    (StatusCode::OK, Json(ApiResponse::success(body)))
}

async fn get_cycle(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    let Ok(cycle_id) = Uuid::parse_str(&id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(format!("Invalid cycle id: {}", id))),
        );
    };

    let audit = state.orchestrator.audit_log();

    match audit.get(cycle_id).await {
        Ok(Some(snapshot)) => {
            let verified = audit.verify_integrity(cycle_id).await.unwrap_or(false);
            (
                StatusCode::OK,
                Json(ApiResponse::success(serde_json::json!({
                    "cycle": snapshot,
                    "integrity_verified": verified,
                }))),
            )
        }
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("Cycle {} not found", cycle_id))),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(format!("Audit lookup failed: {}", e))),
        ),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<Orchestrator>, shutdown: CancellationToken) -> Router {
    let state = ApiState {
        orchestrator,
        shutdown,
    };

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/providers", get(list_providers))
        .route("/api/v1/cycles", post(run_cycles))
        .route("/api/v1/cycles/:id", get(get_cycle))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

/// Serve until `shutdown` fires; in-flight cycles are cancelled with it
pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    port: u16,
    shutdown: CancellationToken,
) -> crate::Result<()> {
    let router = create_router(orchestrator, shutdown.clone());

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
