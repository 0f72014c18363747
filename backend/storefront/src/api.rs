//! Axum REST API handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::faq::{FaqAccordion, FaqItemView};
use crate::revenue::RevenueAggregator;

pub struct ApiState {
    pub revenue: Arc<RevenueAggregator>,
    pub faq: Mutex<FaqAccordion>,
}

impl ApiState {
    pub fn new(revenue: Arc<RevenueAggregator>) -> Self {
        Self {
            revenue,
            faq: Mutex::new(FaqAccordion::default()),
        }
    }
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/faq", get(get_faq))
        .route("/faq/:index/toggle", post(toggle_faq))
        .route("/revenue", get(get_revenue))
        .route("/revenue/refresh", post(refresh_revenue))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct FaqResponse {
    pub open_index: Option<usize>,
    pub items: Vec<FaqItemView>,
}

impl From<&FaqAccordion> for FaqResponse {
    fn from(faq: &FaqAccordion) -> Self {
        Self {
            open_index: faq.open_index(),
            items: faq.view(),
        }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /faq`
pub async fn get_faq(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let faq = state.faq.lock().await;
    Json(FaqResponse::from(&*faq))
}

/// `POST /faq/:index/toggle`
///
/// Expands the entry, or collapses it when it is already open.
pub async fn toggle_faq(
    State(state): State<Arc<ApiState>>,
    Path(index): Path<usize>,
) -> impl IntoResponse {
    let mut faq = state.faq.lock().await;
    if index >= faq.len() {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!(ErrorResponse {
                error: format!("No FAQ entry at index {index}"),
            })),
        )
            .into_response();
    }
    faq.toggle(index);
    (StatusCode::OK, Json(FaqResponse::from(&*faq))).into_response()
}

/// `GET /revenue`
pub async fn get_revenue(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(state.revenue.stats())
}

/// `POST /revenue/refresh`
///
/// Runs a full recomputation and returns the resulting stats. Query
/// failures are reported in the body's `error` field, not as HTTP errors.
pub async fn refresh_revenue(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(state.revenue.refresh().await)
}
