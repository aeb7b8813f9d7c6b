use crate::{
    handlers::{
        analysis::UploadResponse,
        auth::{LoginRequest, RegisterRequest, TokenResponse},
        health::HealthStatus,
    },
    models::{FileHashes, JobStatus, JobStatusView, OwaspCategory, ScanStatus, Severity, UserProfile},
    response::ApiResponse,
};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

/// 声明 Bearer 令牌认证方式
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        // 认证API
        crate::handlers::auth::register,
        crate::handlers::auth::login,
        crate::handlers::auth::logout,
        // 分析任务API
        crate::handlers::analysis::upload_apk,
        crate::handlers::analysis::get_analysis_status,
        crate::handlers::analysis::get_analysis_results,
        crate::handlers::analysis::list_analysis_history,
        crate::handlers::analysis::delete_analysis,
        crate::handlers::ws::ws_handler,
        // 系统监控
        crate::handlers::health::health_check,
    ),
    components(
        schemas(
            // 认证相关模型
            RegisterRequest,
            LoginRequest,
            TokenResponse,
            UserProfile,
            // 分析任务相关模型
            UploadResponse,
            JobStatus,
            JobStatusView,
            FileHashes,
            // 漏洞分类
            Severity,
            OwaspCategory,
            ScanStatus,
            HealthStatus,
            // 通用响应模型
            ApiResponse<UploadResponse>,
            ApiResponse<TokenResponse>,
            ApiResponse<JobStatusView>,
            ApiResponse<HealthStatus>,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "用户注册、登录与注销"),
        (name = "analysis", description = "APK上传、分析任务状态、结果与进度推送"),
        (name = "system", description = "系统健康状态")
    ),
    info(
        title = "APK Scan API",
        version = "1.0.0",
        description = "APK 漏洞扫描与异步分析任务 REST API 文档"
    ),
    servers(
        (url = "http://localhost:8080", description = "开发环境")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_analysis_paths() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/analysis/upload",
            "/api/analysis/{id}/status",
            "/api/analysis/{id}/results",
            "/api/analysis/history",
            "/api/auth/login",
            "/api/health",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}
