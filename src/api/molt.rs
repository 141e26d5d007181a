//! 预览部署 API
//!
//! 包含 /molt/:virtual_host (SSE), /preview/:virtual_host, /resolve/:virtual_host, /jobs 端点

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Json, Router,
};
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use crate::config::env::constants::SSE_KEEPALIVE_SECS;
use crate::domain::job::JobSnapshot;
use crate::domain::vhost::VirtualHostKey;
use crate::error::{ApiError, ApiResult};
use crate::services::stream::MoltEvent;
use crate::services::webhook::preview_url;
use crate::state::address_book::AddressRecord;
use crate::state::AppState;

/// 预览描述
#[derive(Debug, Serialize)]
struct PreviewResponse {
    virtual_host: String,
    revision: String,
    repository: String,
    owner: String,
    /// 部署完成后跳转的地址
    url: String,
    /// 事件流地址
    stream: String,
}

/// 创建预览部署路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/molt/:virtual_host", get(stream_molt))
        .route("/preview/:virtual_host", get(describe_preview))
        .route("/resolve/:virtual_host", get(resolve_address))
        .route("/jobs", get(list_jobs))
}

/// 部署并推送进度
///
/// GET /molt/:virtual_host
async fn stream_molt(
    State(state): State<Arc<AppState>>,
    Path(virtual_host): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let key = VirtualHostKey::parse(&virtual_host)?;

    let stream = state
        .molt
        .clone()
        .events(key)
        .map(|event| Ok::<_, Infallible>(to_sse(event)));

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new().interval(Duration::from_secs(SSE_KEEPALIVE_SECS)),
    ))
}

/// SSE 字段里不允许出现 `\r`
fn to_sse(event: MoltEvent) -> Event {
    let sse = Event::default().data(event.data.replace('\r', ""));
    match event.label() {
        Some(label) => sse.event(label),
        None => sse,
    }
}

/// 预览信息
///
/// GET /preview/:virtual_host
async fn describe_preview(
    State(state): State<Arc<AppState>>,
    Path(virtual_host): Path<String>,
) -> ApiResult<Json<PreviewResponse>> {
    let key = VirtualHostKey::parse(&virtual_host)?;

    Ok(Json(PreviewResponse {
        url: preview_url(&key, &state.config.base_domain),
        stream: format!("/molt/{}", key),
        virtual_host: key.to_string(),
        revision: key.revision,
        repository: key.repository,
        owner: key.owner,
    }))
}

/// 查询已发布的地址
///
/// GET /resolve/:virtual_host
async fn resolve_address(
    State(state): State<Arc<AppState>>,
    Path(virtual_host): Path<String>,
) -> ApiResult<Json<AddressRecord>> {
    let key = VirtualHostKey::parse(&virtual_host)?;
    state
        .addresses()
        .resolve(&key)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Address for '{}'", key)))
}

/// 注册表中的任务
///
/// GET /jobs
async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobSnapshot>> {
    Json(state.registry().snapshots().await)
}
