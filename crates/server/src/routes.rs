use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chainpool_core::{metrics::CONTENT_TYPE, pool::CircuitStatus, PoolError, RpcPool};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Shared handler state.
pub type AppState = Arc<RpcPool>;

/// Builds the HTTP router over a shared pool.
pub fn create_app(pool: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .route("/metrics/json", get(metrics_json))
        .route("/circuits", get(circuits))
        .route("/block-number", get(block_number))
        .route("/balance/{token}/{holder}", get(token_balance))
        .route("/nft/{collection}/{holder}", get(nft_balance))
        .layer(TraceLayer::new_for_http())
        .with_state(pool)
}

/// Pool error rendered as a JSON body: `400 Bad Request` for malformed arguments,
/// `502 Bad Gateway` otherwise.
pub struct ApiError(PoolError);

impl From<PoolError> for ApiError {
    fn from(err: PoolError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (cache_key, last_error) = match &self.0 {
            PoolError::AllProvidersFailed { cache_key, last_error } => {
                (Some(cache_key.as_str()), last_error.as_deref())
            }
            _ => (None, None),
        };
        let status = match &self.0 {
            PoolError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        };
        warn!(error = %self.0, status = status.as_u16(), "request failed");

        let body = json!({
            "error": self.0.to_string(),
            "cache_key": cache_key,
            "last_error": last_error,
        });
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
struct BlockNumberResponse {
    block_number: u64,
}

/// Balances are returned as decimal strings since they can exceed `u64`.
#[derive(Debug, Serialize)]
struct TokenBalanceResponse {
    token: String,
    holder: String,
    balance: String,
}

#[derive(Debug, Serialize)]
struct NftBalanceResponse {
    collection: String,
    holder: String,
    balance: u64,
}

async fn health(State(pool): State<AppState>) -> impl IntoResponse {
    let health = pool.health();
    let status = if health.healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(health))
}

async fn prometheus_metrics(State(pool): State<AppState>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, CONTENT_TYPE)], pool.prometheus_metrics())
}

async fn metrics_json(State(pool): State<AppState>) -> impl IntoResponse {
    Json(pool.metrics_snapshot())
}

async fn circuits(State(pool): State<AppState>) -> Json<Vec<CircuitStatus>> {
    Json(pool.health().circuits)
}

async fn block_number(State(pool): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let block_number = pool.get_block_number().await?;
    Ok(Json(BlockNumberResponse { block_number }))
}

async fn token_balance(
    State(pool): State<AppState>,
    Path((token, holder)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let balance = pool.get_token_balance(&token, &holder).await?;
    Ok(Json(TokenBalanceResponse { token, holder, balance: balance.to_string() }))
}

async fn nft_balance(
    State(pool): State<AppState>,
    Path((collection, holder)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let balance = pool.get_nft_balance(&collection, &holder).await?;
    Ok(Json(NftBalanceResponse { collection, holder, balance }))
}
