//! API 模块
//!
//! HTTP handlers 和路由组装

pub mod health;
pub mod hook;
pub mod molt;

use axum::Router;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

/// 构建完整的 API 路由
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health & Status
        .merge(health::router())
        // Preview deployments
        .merge(molt::router())
        // GitHub webhook
        .merge(hook::router())
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
