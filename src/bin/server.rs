//! Bitgate REST API Server
//!
//! Run with: cargo run --features server --bin bitgate-server
//!
//! Endpoints:
//!   POST /grant              - Grant a unit to a holder
//!   POST /revoke             - Revoke a unit from a holder
//!   POST /check              - Does a principal hold an action?
//!   POST /check-resource     - Does a principal hold a resource action?
//!   POST /users-with-access  - Principals holding a resource action

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use bitgate::{Config, Node, Store, Unit};

type AppState = Arc<Store>;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Deserialize)]
struct GrantReq {
    holder: Node,
    unit: Unit,
}

#[derive(Deserialize)]
struct CheckReq {
    principal: u64,
    action: String,
}

#[derive(Deserialize)]
struct CheckResourceReq {
    principal: u64,
    resource_type: String,
    resource_id: String,
    action_type: String,
}

#[derive(Deserialize)]
struct UsersReq {
    resource_type: String,
    resource_id: String,
    action_type: String,
}

#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    fn err(msg: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(msg.into()) }
    }
}

fn reply<T>(r: bitgate::Result<T>) -> (StatusCode, Json<ApiResponse<T>>) {
    match r {
        Ok(v) => (StatusCode::OK, Json(ApiResponse::ok(v))),
        Err(e) => {
            let status = match e {
                bitgate::Error::Storage(_) | bitgate::Error::Corrupt(_) | bitgate::Error::PropagationFailure { .. } => {
                    error!(error = %e, "request failed");
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                bitgate::Error::NotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::BAD_REQUEST,
            };
            (status, Json(ApiResponse::err(e.to_string())))
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn post_grant(State(store): State<AppState>, Json(req): Json<GrantReq>) -> (StatusCode, Json<ApiResponse<bool>>) {
    reply(store.grant(req.holder, &req.unit))
}

async fn post_revoke(State(store): State<AppState>, Json(req): Json<GrantReq>) -> (StatusCode, Json<ApiResponse<bool>>) {
    reply(store.revoke(req.holder, &req.unit))
}

async fn post_check(State(store): State<AppState>, Json(req): Json<CheckReq>) -> (StatusCode, Json<ApiResponse<bool>>) {
    reply(store.has_action(req.principal, &req.action))
}

async fn post_check_resource(
    State(store): State<AppState>,
    Json(req): Json<CheckResourceReq>,
) -> (StatusCode, Json<ApiResponse<bool>>) {
    reply(store.has_resource_action(req.principal, &req.resource_type, &req.resource_id, &req.action_type))
}

async fn post_users(State(store): State<AppState>, Json(req): Json<UsersReq>) -> (StatusCode, Json<ApiResponse<Vec<u64>>>) {
    reply(store.users_with_access(&req.resource_type, &req.resource_id, &req.action_type))
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    let store: AppState = Arc::new(Store::open(&config)?);

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let app = Router::new()
        .route("/grant", post(post_grant))
        .route("/revoke", post(post_revoke))
        .route("/check", post(post_check))
        .route("/check-resource", post(post_check_resource))
        .route("/users-with-access", post(post_users))
        .layer(cors)
        .with_state(store);

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".into());
    let addr = format!("0.0.0.0:{}", port);
    info!(%addr, "bitgate server listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
