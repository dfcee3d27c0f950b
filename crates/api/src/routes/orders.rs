//! Order ingress and audit endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::{AggregateId, UserId};
use domain::{Aggregate, AggregateStore, Order, OrderType};
use event_store::EventStore;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: EventStore> {
    pub aggregates: AggregateStore<S>,
    pub event_store: S,
}

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: Option<String>,
    pub from_amount: f64,
    pub from_currency: String,
    pub to_currency: String,
    pub order_type: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderAcceptedResponse {
    pub order_id: String,
    pub status: String,
}

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub user_id: String,
    pub from_amount: f64,
    pub from_currency: String,
    pub to_currency: String,
    pub to_amount: f64,
    pub executed_price: f64,
    pub order_type: String,
    pub status: String,
    pub version: i64,
}

#[derive(Serialize)]
pub struct EventResponse {
    pub event_id: String,
    pub event_type: String,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub version: i64,
    pub timestamp: String,
    pub payload: serde_json::Value,
    pub metadata: serde_json::Value,
}

// -- Handlers --

/// POST /orders — accept a new swap order.
///
/// Returns once the `OrderAccepted` append has committed; everything after
/// that point is asynchronous saga work.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(axum::http::StatusCode, Json<OrderAcceptedResponse>), ApiError> {
    let user_id = match &req.user_id {
        Some(id_str) => {
            let uuid = uuid::Uuid::parse_str(id_str)
                .map_err(|e| ApiError::BadRequest(format!("invalid user_id: {e}")))?;
            UserId::from_uuid(uuid)
        }
        None => UserId::new(),
    };
    let order_type: OrderType = req.order_type.parse()?;

    let order_id = AggregateId::new();
    let mut order = Order::default();
    order.accept(
        order_id,
        user_id,
        req.from_amount,
        req.from_currency.as_str(),
        req.to_currency.as_str(),
        order_type,
    )?;
    state.aggregates.save(&mut order).await?;

    tracing::info!(%order_id, %user_id, "order accepted");

    Ok((
        axum::http::StatusCode::CREATED,
        Json(OrderAcceptedResponse {
            order_id: order_id.to_string(),
            status: order.status().to_string(),
        }),
    ))
}

/// GET /orders/{id} — load an order by replaying its stream.
#[tracing::instrument(skip(state))]
pub async fn get<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let order: Order = state
        .aggregates
        .try_load(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("order {id} not found")))?;

    Ok(Json(OrderResponse {
        id: order_id.to_string(),
        user_id: order.user_id().map(|u| u.to_string()).unwrap_or_default(),
        from_amount: order.from_amount(),
        from_currency: order.from_currency().to_string(),
        to_currency: order.to_currency().to_string(),
        to_amount: order.to_amount(),
        executed_price: order.executed_price(),
        order_type: order.order_type().to_string(),
        status: order.status().to_string(),
        version: order.version().as_i64(),
    }))
}

/// GET /orders/{id}/events — full event timeline for an order (audit).
#[tracing::instrument(skip(state))]
pub async fn events<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<EventResponse>>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;

    let envelopes = state
        .event_store
        .load(order_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    if envelopes.is_empty() {
        return Err(ApiError::NotFound(format!("order {id} not found")));
    }

    let responses: Vec<EventResponse> = envelopes
        .into_iter()
        .map(|e| EventResponse {
            event_id: e.event_id.to_string(),
            event_type: e.event_type,
            aggregate_id: e.aggregate_id.to_string(),
            aggregate_type: e.aggregate_type,
            version: e.version.as_i64(),
            timestamp: e.timestamp.to_rfc3339(),
            payload: e.payload,
            metadata: serde_json::to_value(e.metadata).unwrap_or_default(),
        })
        .collect();

    Ok(Json(responses))
}

fn parse_aggregate_id(id: &str) -> Result<AggregateId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("invalid ID format: {e}")))?;
    Ok(AggregateId::from(uuid))
}
