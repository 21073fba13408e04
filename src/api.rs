// 🌐 REST API - HTTP framing of the registration gate plus read-only views
//
// POST /api/accounts               register (200 / 400 / 500)
// GET  /api/accounts/:email        stored record
// GET  /api/guardrails/unguarded   accounts left without a budget
// GET  /api/health

use crate::app::Services;
use crate::db::{Event, RecordStore};
use crate::entities::AccountRecord;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

/// API Response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

fn reply<T: Serialize>(status: StatusCode, body: ApiResponse<T>) -> Response {
    (status, Json(body)).into_response()
}

#[derive(Debug, Serialize)]
struct RegistrationResponse {
    message: String,
    email: String,
    sequence: i64,
}

#[derive(Debug, Serialize)]
struct UnguardedAccount {
    account_id: String,
    failed_at: String,
    error: Option<String>,
}

impl From<Event> for UnguardedAccount {
    fn from(event: Event) -> Self {
        Self {
            error: event.data.get("error").and_then(|v| v.as_str()).map(str::to_string),
            account_id: event.entity_id,
            failed_at: event.timestamp.to_rfc3339(),
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/health
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// POST /api/accounts - body is parsed by the gate so malformed JSON is a 400 with our message
async fn register_account(State(services): State<Services>, body: String) -> Response {
    match services.gate.register_json(&body).await {
        Ok(accepted) => reply(
            StatusCode::OK,
            ApiResponse::ok(RegistrationResponse {
                message: accepted.message.to_string(),
                email: accepted.record.email,
                sequence: accepted.sequence,
            }),
        ),
        Err(rejected) => {
            let status = StatusCode::from_u16(rejected.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            reply(status, ApiResponse::<()>::err(rejected.message()))
        }
    }
}

/// GET /api/accounts/:email
async fn get_account(State(services): State<Services>, Path(email): Path<String>) -> Response {
    match services.store.get(&email).await {
        Ok(Some(record)) => reply(StatusCode::OK, ApiResponse::<AccountRecord>::ok(record)),
        Ok(None) => reply(
            StatusCode::NOT_FOUND,
            ApiResponse::<()>::err(format!("No account information for {}", email)),
        ),
        Err(e) => {
            error!(error = %e, "account lookup failed");
            reply(StatusCode::INTERNAL_SERVER_ERROR, ApiResponse::<()>::err(e.to_string()))
        }
    }
}

/// GET /api/guardrails/unguarded
async fn list_unguarded(State(services): State<Services>) -> Response {
    match services.store.unguarded_accounts() {
        Ok(events) => {
            let accounts: Vec<UnguardedAccount> = events.into_iter().map(Into::into).collect();
            reply(StatusCode::OK, ApiResponse::ok(accounts))
        }
        Err(e) => {
            error!(error = %e, "unguarded listing failed");
            reply(StatusCode::INTERNAL_SERVER_ERROR, ApiResponse::<()>::err(e.to_string()))
        }
    }
}

pub fn router(services: Services) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/accounts", post(register_account))
        .route("/accounts/:email", get(get_account))
        .route("/guardrails/unguarded", get(list_unguarded))
        .with_state(services);

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
