//! Order route handlers.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use orderline_core::{Order, OrderUid};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::services::OrderSource;
use crate::state::AppState;

/// Confirmation body for create and delete.
#[derive(Debug, Serialize)]
pub struct OrderAck {
    pub message: &'static str,
    pub order_uid: OrderUid,
}

/// Body of the key listing.
#[derive(Debug, Serialize)]
pub struct OrderKeys {
    pub order_uids: Vec<OrderUid>,
}

/// `POST /order`
///
/// The order is stored, cached, and published downstream.
pub async fn create(
    State(state): State<AppState>,
    payload: std::result::Result<Json<Order>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderAck>)> {
    let Json(order) = payload.inspect_err(|e| debug!(error = %e, "Rejected order body"))?;
    let order_uid = order.order_uid.clone();

    state.orders().add(order, OrderSource::Api).await?;

    info!(order_uid = %order_uid, "Order created");
    Ok((
        StatusCode::CREATED,
        Json(OrderAck {
            message: "Order created successfully",
            order_uid,
        }),
    ))
}

/// `GET /order/{order_id}`
pub async fn show(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<Order>> {
    let uid = require_uid(order_id)?;
    let order = state.orders().get(&uid).await?;
    Ok(Json(order))
}

/// `DELETE /order/{order_id}`
pub async fn delete(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<OrderAck>> {
    let uid = require_uid(order_id)?;
    state.orders().delete(&uid).await?;

    info!(order_uid = %uid, "Order deleted");
    Ok(Json(OrderAck {
        message: "Order deleted successfully",
        order_uid: uid,
    }))
}

/// `GET /orders`
pub async fn index(State(state): State<AppState>) -> Result<Json<OrderKeys>> {
    let order_uids = state.orders().list_keys().await?;
    debug!(count = order_uids.len(), "Listing order keys");
    Ok(Json(OrderKeys { order_uids }))
}

/// Keys are opaque: the path segment is used exactly as decoded.
fn require_uid(order_id: String) -> Result<OrderUid> {
    if order_id.is_empty() {
        return Err(AppError::BadRequest("Order ID is missing".to_string()));
    }
    Ok(OrderUid::new(order_id))
}
