//! Axum router and HTTP handlers for the ledger API.
//!
//! Request bodies are decoded once into [`BlockRequest`]; amounts keep their
//! exact decimal text. Store work runs on the blocking thread pool so that a
//! slow RocksDB write never stalls the async runtime.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use ledger_core::error::{ErrorKind, LedgerError};
use ledger_core::service::{BalanceService, BlockService, CoinbasePolicy};
use ledger_core::store::LedgerStore;
use ledger_core::types::{BlockRequest, BlockRow};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Services shared by every handler.
pub struct AppState<S> {
    pub blocks: Arc<BlockService<S>>,
    pub balances: Arc<BalanceService<S>>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            blocks: Arc::clone(&self.blocks),
            balances: Arc::clone(&self.balances),
        }
    }
}

impl<S: LedgerStore> AppState<S> {
    pub fn new(store: Arc<S>, coinbase_policy: CoinbasePolicy) -> Self {
        Self {
            blocks: Arc::new(BlockService::with_policy(Arc::clone(&store), coinbase_policy)),
            balances: Arc::new(BalanceService::new(store)),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error returned by a handler, rendered as `{"message": ...}`.
#[derive(Debug)]
pub enum ApiError {
    Ledger(LedgerError),
    BadRequest(String),
    Internal(String),
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        ApiError::Ledger(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(e: PathRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Ledger(e) => match e.kind() {
                ErrorKind::Validation => (StatusCode::BAD_REQUEST, e.to_string()),
                ErrorKind::Infrastructure => {
                    error!(error = %e, "ledger store failure");
                    (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
                }
            },
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Internal(detail) => {
                error!(%detail, "handler failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };
        (status, Json(MessageResponse { message })).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Run store-bound work off the async runtime.
async fn run_blocking<T, F>(work: F) -> ApiResult<T>
where
    F: FnOnce() -> Result<T, LedgerError> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(work).await??)
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: &str) -> Json<Self> {
        Json(Self {
            message: message.to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    /// Written as a JSON number with the exact decimal digits.
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub balance: Decimal,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub height: Option<u64>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router<S: LedgerStore + 'static>(state: AppState<S>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::<S>))
        .route("/block", post(post_block::<S>))
        .route("/block/:height", get(get_block::<S>))
        .route("/balance/:address", get(get_balance::<S>))
        .route("/rollback/:height", post(rollback::<S>))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `POST /block`: validate and commit a block.
async fn post_block<S: LedgerStore + 'static>(
    State(state): State<AppState<S>>,
    payload: Result<Json<BlockRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<MessageResponse>)> {
    let Json(request) = payload?;
    let blocks = Arc::clone(&state.blocks);
    let block = run_blocking(move || blocks.create_block(&request)).await?;
    info!(height = block.height, id = %block.id, "block accepted");
    Ok((StatusCode::CREATED, MessageResponse::new("Block created successfully")))
}

/// `GET /balance/:address`: current balance of an address.
async fn get_balance<S: LedgerStore + 'static>(
    State(state): State<AppState<S>>,
    Path(address): Path<String>,
) -> ApiResult<Json<BalanceResponse>> {
    let balances = Arc::clone(&state.balances);
    let balance = run_blocking(move || balances.get_address_balance(&address)).await?;
    Ok(Json(BalanceResponse { balance }))
}

/// `POST /rollback/:height`: drop every block above `height`.
async fn rollback<S: LedgerStore + 'static>(
    State(state): State<AppState<S>>,
    height: Result<Path<u64>, PathRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let Path(height) = height?;
    if height < 1 {
        return Err(ApiError::BadRequest("height must be >= 1".into()));
    }
    let blocks = Arc::clone(&state.blocks);
    run_blocking(move || blocks.rollback_block(height)).await?;
    Ok(MessageResponse::new("Rollback successful"))
}

/// `GET /block/:height`: committed block header.
async fn get_block<S: LedgerStore + 'static>(
    State(state): State<AppState<S>>,
    height: Result<Path<u64>, PathRejection>,
) -> ApiResult<Json<BlockRow>> {
    let Path(height) = height?;
    let blocks = Arc::clone(&state.blocks);
    let block = run_blocking(move || {
        blocks
            .get_block(height)?
            .ok_or(LedgerError::BlockNotFound(height))
    })
    .await?;
    Ok(Json(block))
}

/// `GET /health`: liveness plus current tip height.
async fn health<S: LedgerStore + 'static>(
    State(state): State<AppState<S>>,
) -> ApiResult<Json<HealthResponse>> {
    let blocks = Arc::clone(&state.blocks);
    let height = run_blocking(move || blocks.highest_height()).await?;
    Ok(Json(HealthResponse { status: "ok", height }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use ledger_core::store::MemoryLedgerStore;
    use serde_json::Value;
    use tower::ServiceExt;

    fn app() -> Router {
        let store = Arc::new(MemoryLedgerStore::new());
        router(AppState::new(store, CoinbasePolicy::AnyHeight))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_empty_ledger() {
        let (status, body) = send(&app(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert!(body["height"].is_null());
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let (status, body) = send(&app(), "POST", "/block", Some("{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn missing_field_is_bad_request() {
        let (status, _) = send(&app(), "POST", "/block", Some(r#"{"height":1,"id":"x"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn rollback_height_zero_is_bad_request() {
        let (status, body) = send(&app(), "POST", "/rollback/0", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "height must be >= 1");
    }

    #[tokio::test]
    async fn rollback_non_numeric_height_is_bad_request() {
        let (status, _) = send(&app(), "POST", "/rollback/abc", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn rollback_unknown_height_is_bad_request() {
        let (status, body) = send(&app(), "POST", "/rollback/1", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "block not found at height 1");
    }

    #[tokio::test]
    async fn unknown_address_has_zero_balance() {
        let (status, body) = send(&app(), "GET", "/balance/nobody", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["balance"], 0);
    }

    #[tokio::test]
    async fn non_alphanumeric_address_is_bad_request() {
        let (status, body) = send(&app(), "GET", "/balance/a%20b", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().contains("must match"));
    }

    #[tokio::test]
    async fn storage_errors_hide_details() {
        let response = ApiError::Ledger(LedgerError::Storage("disk on fire".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["message"], "Internal server error");
    }
}
