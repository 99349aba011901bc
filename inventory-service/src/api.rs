use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use shared::*;
use tower_http::trace::TraceLayer;

use crate::engine::InventoryEngine;
use crate::error::{ErrorKind, InventoryError};
use crate::store::LedgerStore;

pub struct AppState<S: LedgerStore> {
    pub engine: Arc<InventoryEngine<S>>,
}

impl<S: LedgerStore> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<S: LedgerStore> AppState<S> {
    pub fn new(engine: Arc<InventoryEngine<S>>) -> Self {
        Self { engine }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
}

pub enum ApiFailure {
    Rejected(JsonRejection),
    Inventory(InventoryError),
}

impl From<InventoryError> for ApiFailure {
    fn from(err: InventoryError) -> Self {
        ApiFailure::Inventory(err)
    }
}

impl From<JsonRejection> for ApiFailure {
    fn from(rejection: JsonRejection) -> Self {
        ApiFailure::Rejected(rejection)
    }
}

fn status_for(err: &InventoryError) -> StatusCode {
    match (err.kind(), err) {
        (_, InventoryError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        (_, InventoryError::Unhealthy(_)) => StatusCode::SERVICE_UNAVAILABLE,
        (ErrorKind::Validation, _) => StatusCode::BAD_REQUEST,
        (ErrorKind::NotFound, _) => StatusCode::NOT_FOUND,
        (ErrorKind::Conflict, _) => StatusCode::CONFLICT,
        (ErrorKind::Consistency, _) | (ErrorKind::Infrastructure, _) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        match self {
            ApiFailure::Rejected(rejection) => (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::<()>::failed("VALIDATION_ERROR", rejection.body_text())),
            )
                .into_response(),
            ApiFailure::Inventory(err) => {
                let status = status_for(&err);
                let message = match err.kind() {
                    ErrorKind::Infrastructure if !matches!(err, InventoryError::Unhealthy(_)) => {
                        tracing::error!("Inventory operation failed: {}", err);
                        "unexpected internal error".to_string()
                    }
                    ErrorKind::Consistency => {
                        tracing::error!("Inventory invariant violated: {}", err);
                        err.to_string()
                    }
                    _ => err.to_string(),
                };
                (status, Json(ApiResponse::<()>::failed(err.code(), message))).into_response()
            }
        }
    }
}

type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiFailure>;

fn respond<T>(status: StatusCode, message: &str, data: T) -> ApiResult<T> {
    Ok((status, Json(ApiResponse::success(message, data))))
}

pub fn create_router<S: LedgerStore>(state: AppState<S>) -> Router {
    Router::new()
        .route("/health", get(health_check::<S>))
        .route("/inventory/init", post(init_inventory::<S>))
        .route("/inventory/add-stock", post(add_stock::<S>))
        .route("/inventory/reserve", post(reserve::<S>))
        .route("/inventory/release", post(release::<S>))
        .route("/inventory/deduct", post(deduct::<S>))
        .route("/inventory/reservations/:reservation_id", get(get_reservation::<S>))
        .route("/inventory/:product_id", get(get_inventory::<S>))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn health_check<S: LedgerStore>(State(state): State<AppState<S>>) -> ApiResult<HealthStatus> {
    state.engine.health_check().await?;
    respond(StatusCode::OK, "service is healthy", HealthStatus { status: "ok" })
}

pub async fn init_inventory<S: LedgerStore>(
    State(state): State<AppState<S>>,
    payload: Result<Json<InitInventoryRequest>, JsonRejection>,
) -> ApiResult<Stock> {
    let Json(request) = payload?;
    let stock = state
        .engine
        .initialize_stock(&request.product_id, request.quantity)
        .await?;
    respond(StatusCode::OK, "inventory initialized", stock)
}

pub async fn get_inventory<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Path(product_id): Path<String>,
) -> ApiResult<Stock> {
    let stock = state.engine.get_stock(&product_id).await?;
    respond(StatusCode::OK, "inventory fetched", stock)
}

pub async fn add_stock<S: LedgerStore>(
    State(state): State<AppState<S>>,
    payload: Result<Json<AddStockRequest>, JsonRejection>,
) -> ApiResult<Stock> {
    let Json(request) = payload?;
    let stock = state.engine.add_stock(&request.product_id, request.quantity).await?;
    respond(StatusCode::OK, "stock added", stock)
}

pub async fn reserve<S: LedgerStore>(
    State(state): State<AppState<S>>,
    payload: Result<Json<ReserveRequest>, JsonRejection>,
) -> ApiResult<Reservation> {
    let Json(request) = payload?;
    let reservation = state
        .engine
        .reserve(&request.product_id, &request.order_id, request.quantity)
        .await?;
    respond(StatusCode::CREATED, "stock reserved", reservation)
}

pub async fn release<S: LedgerStore>(
    State(state): State<AppState<S>>,
    payload: Result<Json<ReservationActionRequest>, JsonRejection>,
) -> ApiResult<Reservation> {
    let Json(request) = payload?;
    let reservation = state.engine.release(&request.reservation_id).await?;
    respond(StatusCode::OK, "reservation released", reservation)
}

pub async fn deduct<S: LedgerStore>(
    State(state): State<AppState<S>>,
    payload: Result<Json<ReservationActionRequest>, JsonRejection>,
) -> ApiResult<Reservation> {
    let Json(request) = payload?;
    let reservation = state.engine.deduct(&request.reservation_id).await?;
    respond(StatusCode::OK, "reservation deducted", reservation)
}

pub async fn get_reservation<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Path(reservation_id): Path<String>,
) -> ApiResult<Reservation> {
    let reservation = state.engine.get_reservation(&reservation_id).await?;
    respond(StatusCode::OK, "reservation fetched", reservation)
}
