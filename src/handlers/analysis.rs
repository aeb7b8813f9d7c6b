use axum::{
    Json,
    extract::{Multipart, Path, State},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::path::PathBuf;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use super::{AppState, AuthUser};
use crate::error::{AppError, AppResult};
use crate::models::{AnalysisJob, JobStatus, JobStatusView, ScanResult};
use crate::response::ApiResponse;
use crate::scanner::tools::decoded_dir_for;

/// 上传响应
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    /// 分析任务ID
    pub analysis_id: Uuid,
    /// 任务状态，新任务恒为 queued
    pub status: JobStatus,
    /// 清洗后的文件名
    pub filename: String,
    pub file_size: u64,
    pub sha256: String,
}

fn multipart_error(e: impl std::fmt::Display) -> AppError {
    let error_msg = e.to_string();
    if error_msg.contains("body longer than") || error_msg.contains("body is too large") {
        AppError::bad_request("上传文件过大")
    } else {
        AppError::bad_request(format!("文件上传失败: {}", error_msg))
    }
}

/// 上传APK并提交分析任务
///
/// multipart 字段：`file`（必填）与 `options`（可选，JSON 对象，原样记录在任务上）。
#[utoipa::path(
    post,
    path = "/api/analysis/upload",
    tag = "analysis",
    security(("bearer" = [])),
    responses(
        (status = 201, description = "任务已排队", body = UploadResponse),
        (status = 400, description = "缺少文件、options 不是 JSON 对象或 APK 结构不合法"),
        (status = 401, description = "需要身份认证"),
        (status = 413, description = "文件过大"),
        (status = 415, description = "不是 .apk 文件")
    )
)]
pub async fn upload_apk(
    State(app_state): State<AppState>,
    auth: AuthUser,
    mut multipart: Multipart,
) -> Result<ApiResponse<UploadResponse>, AppError> {
    let mut file_data: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;
    let mut options = Map::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name().unwrap_or("") {
            "file" => {
                filename = field.file_name().map(|s| s.to_string());
                file_data = Some(field.bytes().await.map_err(multipart_error)?.to_vec());
            }
            "options" => {
                let text = field.text().await.map_err(multipart_error)?;
                if !text.trim().is_empty() {
                    options = serde_json::from_str(&text)
                        .map_err(|e| AppError::bad_request(format!("options 不是合法的JSON对象: {}", e)))?;
                }
            }
            other => tracing::debug!("忽略未知的上传字段: {}", other),
        }
    }

    let file_data = file_data.ok_or_else(|| AppError::bad_request("缺少上传文件字段 file"))?;
    let filename = filename.unwrap_or_default();

    let response = submit_upload(&app_state, &auth, &file_data, &filename, options).await?;
    Ok(ApiResponse::created(response, "文件上传成功，分析已排队".to_string()))
}

/// 处理上传内容、落盘、登记任务并入队
pub async fn submit_upload(
    app_state: &AppState,
    auth: &AuthUser,
    file_data: &[u8],
    filename: &str,
    options: Map<String, JsonValue>,
) -> AppResult<UploadResponse> {
    if app_state.queue.is_shut_down() {
        return Err(AppError::service_unavailable("分析队列已关闭"));
    }

    let processed = app_state
        .file_processor
        .process_upload(file_data, filename)
        .await?;

    let analysis_id = Uuid::new_v4();
    let upload_dir = PathBuf::from(&app_state.config.upload.dir);
    tokio::fs::create_dir_all(&upload_dir).await?;
    let file_path = upload_dir.join(format!("{}_{}", analysis_id, processed.filename));
    tokio::fs::write(&file_path, file_data).await?;

    let job = AnalysisJob::new(
        analysis_id,
        processed.filename.clone(),
        file_path.to_string_lossy(),
        auth.user.id,
        options,
    )
    .with_hashes(processed.hashes.clone());
    register_job(app_state, job).await?;

    tracing::info!(
        job_id = %analysis_id,
        user = %auth.user.username,
        size = processed.size,
        dex = processed.apk.dex_count,
        "APK上传成功，分析已排队: {}",
        processed.filename
    );

    Ok(UploadResponse {
        analysis_id,
        status: JobStatus::Queued,
        filename: processed.filename,
        file_size: processed.size,
        sha256: processed.hashes.sha256,
    })
}

/// 登记并入队；入队失败时撤回任务并删除已写入的上传文件
async fn register_job(app_state: &AppState, job: AnalysisJob) -> AppResult<()> {
    let (analysis_id, file_path) = (job.id, PathBuf::from(&job.file_path));
    app_state.store.create(job)?;

    if app_state.queue.enqueue(analysis_id) {
        return Ok(());
    }

    tracing::error!(job_id = %analysis_id, "任务入队失败，队列已关闭");
    app_state.store.withdraw(analysis_id);
    match tokio::fs::remove_file(&file_path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
            tracing::warn!(job_id = %analysis_id, error = %e, "删除上传文件失败");
        }
        _ => {}
    }
    Err(AppError::service_unavailable("分析队列已关闭"))
}

/// 查询任务状态
#[utoipa::path(
    get,
    path = "/api/analysis/{id}/status",
    tag = "analysis",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "分析任务ID")),
    responses(
        (status = 200, description = "查询成功", body = JobStatusView),
        (status = 403, description = "任务属于其他用户"),
        (status = 404, description = "任务不存在")
    )
)]
pub async fn get_analysis_status(
    State(app_state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<JobStatusView>>, AppError> {
    let job = app_state.owned_job(&auth, id)?;
    Ok(Json(crate::ok_response!(JobStatusView::from(&job))))
}

/// 获取扫描结果，仅已完成的任务可用
#[utoipa::path(
    get,
    path = "/api/analysis/{id}/results",
    tag = "analysis",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "分析任务ID")),
    responses(
        (status = 200, description = "扫描结果"),
        (status = 400, description = "分析尚未完成"),
        (status = 403, description = "任务属于其他用户"),
        (status = 404, description = "任务不存在")
    )
)]
pub async fn get_analysis_results(
    State(app_state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Arc<ScanResult>>>, AppError> {
    let job = app_state.owned_job(&auth, id)?;
    if job.status != JobStatus::Completed {
        return Err(AppError::bad_request(format!(
            "分析尚未完成，当前状态: {:?}",
            job.status
        )));
    }

    let result = match job.result {
        Some(result) => result,
        None => Arc::new(app_state.results.load(id).await?),
    };
    Ok(Json(crate::ok_response!(result)))
}

/// 当前用户的分析历史，按提交时间倒序
#[utoipa::path(
    get,
    path = "/api/analysis/history",
    tag = "analysis",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "查询成功", body = [JobStatusView]),
        (status = 401, description = "需要身份认证")
    )
)]
pub async fn list_analysis_history(
    State(app_state): State<AppState>,
    auth: AuthUser,
) -> Json<ApiResponse<Vec<JobStatusView>>> {
    let history = app_state
        .store
        .list_by_owner(auth.user.id)
        .iter()
        .map(JobStatusView::from)
        .collect();
    Json(crate::ok_response!(history))
}

/// 删除已结束的任务及其上传文件、解码目录与结果文件
#[utoipa::path(
    delete,
    path = "/api/analysis/{id}",
    tag = "analysis",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "分析任务ID")),
    responses(
        (status = 200, description = "删除成功"),
        (status = 403, description = "任务属于其他用户"),
        (status = 404, description = "任务不存在"),
        (status = 409, description = "任务排队或运行中，不能删除")
    )
)]
pub async fn delete_analysis(
    State(app_state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    app_state.owned_job(&auth, id)?;
    let job = app_state.store.evict(id)?;
    app_state.broadcaster.close(id);

    if let Err(e) = app_state.results.remove(id).await {
        tracing::warn!(job_id = %id, error = %e, "删除结果文件失败");
    }

    let upload = PathBuf::from(&job.file_path);
    match tokio::fs::remove_file(&upload).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
            tracing::warn!(job_id = %id, error = %e, "删除上传文件失败");
        }
        _ => {}
    }
    match tokio::fs::remove_dir_all(decoded_dir_for(&upload)).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
            tracing::warn!(job_id = %id, error = %e, "删除解码目录失败");
        }
        _ => {}
    }

    tracing::info!(job_id = %id, "分析任务已删除");
    Ok(Json(ApiResponse::<()>::success_with_message(
        (),
        "删除成功".to_string(),
    )))
}
