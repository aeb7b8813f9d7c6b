pub mod analysis;
pub mod auth;
pub mod health;
pub mod ws;

pub use analysis::{
    delete_analysis, get_analysis_results, get_analysis_status, list_analysis_history,
    upload_apk,
};
pub use auth::{login, logout, register};
pub use health::health_check;
pub use ws::ws_handler;

use axum::extract::{FromRequestParts, Query};
use axum::http::{header, request::Parts};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::{PasswordHasher, SessionStore};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::file_processing::FileProcessor;
use crate::jobs::{JobQueue, JobStore, ProgressBroadcaster, WorkerContext};
use crate::models::{AnalysisJob, User};
use crate::scanner::VulnerabilityScanner;
use crate::storage::ResultStore;

/// 应用状态
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: JobStore,
    pub queue: JobQueue,
    pub broadcaster: ProgressBroadcaster,
    pub sessions: SessionStore,
    pub file_processor: FileProcessor,
    pub results: ResultStore,
}

impl AppState {
    pub fn new(config: Config, results: ResultStore) -> AppResult<Self> {
        let hasher = PasswordHasher::new(
            config.auth.password_memory_kib,
            config.auth.password_iterations,
        )?;
        Ok(Self {
            store: JobStore::new(),
            queue: JobQueue::new(),
            broadcaster: ProgressBroadcaster::new(config.worker.broadcast_capacity),
            sessions: SessionStore::new(config.auth.session_ttl_hours, hasher),
            file_processor: FileProcessor::new(&config.upload),
            results,
            config,
        })
    }

    /// 工作池共享同一任务表、队列与广播器
    pub fn worker_context(&self, scanner: VulnerabilityScanner) -> WorkerContext {
        WorkerContext {
            store: self.store.clone(),
            queue: self.queue.clone(),
            broadcaster: self.broadcaster.clone(),
            scanner,
            results: Some(self.results.clone()),
        }
    }

    /// 读取任务并校验归属：不存在返回 404，属于他人返回 403
    pub fn owned_job(&self, user: &AuthUser, id: Uuid) -> AppResult<AnalysisJob> {
        let job = self.store.get(id)?;
        if job.user_id != user.user.id {
            return Err(AppError::AccessDenied);
        }
        Ok(job)
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// 已认证的请求方
///
/// 令牌取自 `Authorization: Bearer <token>`；浏览器的 WebSocket 握手
/// 无法设置请求头，因此也接受 `?token=` 查询参数。
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub token: String,
    pub user: User,
}

impl AuthUser {
    fn token_from(parts: &Parts) -> Option<String> {
        let from_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(|t| t.trim().to_string());

        from_header.or_else(|| {
            Query::<TokenQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(q)| q.token)
        })
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = Self::token_from(parts).ok_or(AppError::Unauthorized)?;
        let user = state.sessions.authenticate(&token)?;
        Ok(AuthUser { token, user })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use axum::http::Request;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// 基于临时目录的应用状态
    pub(crate) async fn test_state(dir: &TempDir) -> AppState {
        let mut config = Config::default();
        config.upload.dir = dir.path().join("uploads").to_string_lossy().into_owned();
        config.results.dir = dir.path().join("results").to_string_lossy().into_owned();

        config.auth.password_memory_kib = 1024;
        config.auth.password_iterations = 1;

        let storage = LocalStorage::new(&config.results.dir).await.unwrap();
        AppState::new(config, ResultStore::new(Arc::new(storage))).unwrap()
    }

    /// 注册并登录一个用户
    pub(crate) async fn login_as(state: &AppState, name: &str) -> AuthUser {
        state
            .sessions
            .register(name, &format!("{}@example.com", name), "password1")
            .await
            .unwrap();
        let (session, user) = state.sessions.login(name, "password1").await.unwrap();
        AuthUser {
            token: session.token,
            user,
        }
    }

    fn parts(request: Request<()>) -> Parts {
        request.into_parts().0
    }

    #[tokio::test]
    async fn test_bearer_token_extracted() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir).await;
        let auth = login_as(&state, "alice").await;

        let mut parts = parts(
            Request::builder()
                .uri("/api/analysis/history")
                .header(header::AUTHORIZATION, format!("Bearer {}", auth.token))
                .body(())
                .unwrap(),
        );
        let extracted = AuthUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap();
        assert_eq!(extracted.user.id, auth.user.id);
    }

    #[tokio::test]
    async fn test_query_token_extracted() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir).await;
        let auth = login_as(&state, "bob").await;

        let mut parts = parts(
            Request::builder()
                .uri(format!("/api/ws?token={}", auth.token))
                .body(())
                .unwrap(),
        );
        let extracted = AuthUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap();
        assert_eq!(extracted.user.username, "bob");
    }

    #[tokio::test]
    async fn test_missing_or_bad_token_rejected() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir).await;

        let mut missing = parts(Request::builder().uri("/").body(()).unwrap());
        assert!(matches!(
            AuthUser::from_request_parts(&mut missing, &state).await,
            Err(AppError::Unauthorized)
        ));

        let mut bad = parts(
            Request::builder()
                .uri("/")
                .header(header::AUTHORIZATION, "Bearer nope")
                .body(())
                .unwrap(),
        );
        assert!(matches!(
            AuthUser::from_request_parts(&mut bad, &state).await,
            Err(AppError::Unauthorized)
        ));
    }
}
