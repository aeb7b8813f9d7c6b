use axum::extract::State;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::AppState;
use crate::models::JobStatus;
use crate::response::{ApiResponse, ResponseCode};

/// 服务健康状态
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    /// 正在分析的任务数
    pub active_analyses: usize,
    /// 排队等待的任务数
    pub queued_analyses: usize,
    pub workers: usize,
    pub storage_backend: String,
    pub storage_healthy: bool,
}

/// 健康检查
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "system",
    responses(
        (status = 200, description = "服务正常", body = HealthStatus),
        (status = 503, description = "结果存储不可用")
    )
)]
pub async fn health_check(State(app_state): State<AppState>) -> ApiResponse<HealthStatus> {
    let storage = app_state.results.storage();
    let storage_healthy = storage.health_check().await;

    let health = HealthStatus {
        status: if storage_healthy { "healthy" } else { "degraded" }.to_string(),
        timestamp: Utc::now(),
        active_analyses: app_state.store.count_by_status(JobStatus::Running),
        queued_analyses: app_state.store.count_by_status(JobStatus::Queued),
        workers: app_state.config.worker.pool_size,
        storage_backend: storage.backend_name().to_string(),
        storage_healthy,
    };

    if storage_healthy {
        ApiResponse::success(health)
    } else {
        tracing::warn!("健康检查: 结果存储不可用 ({})", health.storage_backend);
        ApiResponse::error_with_data(ResponseCode::ServiceUnavailable, "结果存储不可用", health)
    }
}
