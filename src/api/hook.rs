//! GitHub webhook API
//!
//! POST /hook

use axum::{extract::State, http::HeaderMap, routing::post, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{ApiError, ApiResult};
use crate::infra::github::GithubError;
use crate::services::webhook::{self, PullRequestEvent};
use crate::state::AppState;

#[derive(Debug, Serialize)]
struct HookResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

impl HookResponse {
    fn ignored() -> Self {
        Self {
            status: "ignored",
            url: None,
        }
    }
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/hook", post(handle_hook))
}

/// 处理 GitHub 事件
///
/// 只有 pull_request 的 opened / synchronize 会触发评论，其它事件直接返回
async fn handle_hook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<serde_json::Value>,
) -> ApiResult<Json<HookResponse>> {
    let event_name = headers
        .get("X-GitHub-Event")
        .and_then(|v| v.to_str().ok());
    if !webhook::is_pull_request(event_name) {
        return Ok(Json(HookResponse::ignored()));
    }

    let event: PullRequestEvent = serde_json::from_value(payload)
        .map_err(|e| ApiError::bad_request(format!("Invalid pull_request payload: {}", e)))?;
    if !event.wants_preview() {
        return Ok(Json(HookResponse::ignored()));
    }

    let url = webhook::announce(&state.github, &state.config.base_domain, &event)
        .await
        .map_err(|e| match e {
            GithubError::MissingToken => {
                warn!("Received pull_request event but no GitHub token is configured");
                ApiError::service_unavailable(GithubError::MissingToken.to_string())
            }
            other => ApiError::internal(other.to_string()),
        })?;

    info!(url = %url, action = %event.action, "Announced preview");
    Ok(Json(HookResponse {
        status: "commented",
        url: Some(url),
    }))
}
