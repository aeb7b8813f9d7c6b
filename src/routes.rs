use crate::handlers::{
    AppState, delete_analysis, get_analysis_results, get_analysis_status, health_check,
    list_analysis_history, login, logout, register, upload_apk, ws_handler,
};
use axum::{
    Router,
    routing::{delete as axum_delete, get, post},
};

/// 创建API路由
pub fn create_api_routes() -> Router<AppState> {
    Router::new()
        // 系统状态
        .route("/api/health", get(health_check))
        // 认证API
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        // 分析任务API
        .route("/api/analysis/upload", post(upload_apk)) // 上传并排队
        .route("/api/analysis/history", get(list_analysis_history)) // 当前用户的历史
        .route("/api/analysis/{id}/status", get(get_analysis_status)) // 轮询状态
        .route("/api/analysis/{id}/results", get(get_analysis_results)) // 扫描结果
        .route("/api/analysis/{id}", axum_delete(delete_analysis)) // 删除已结束的任务
        // 进度推送
        .route("/api/ws", get(ws_handler))
}
