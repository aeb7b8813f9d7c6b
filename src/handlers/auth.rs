use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{AppState, AuthUser};
use crate::error::AppError;
use crate::models::UserProfile;
use crate::response::ApiResponse;

/// 注册请求
#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// 登录请求
#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// 登录/注册成功后的令牌
#[derive(Debug, Serialize, ToSchema)]
pub struct TokenResponse {
    pub token: String,
    pub user: UserProfile,
}

/// 注册新用户并直接签发令牌
#[utoipa::path(
    post,
    path = "/api/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "注册成功", body = TokenResponse),
        (status = 400, description = "用户名、邮箱或密码不合法"),
        (status = 409, description = "用户名或邮箱已被注册")
    )
)]
pub async fn register(
    State(app_state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<ApiResponse<TokenResponse>, AppError> {
    let user = app_state
        .sessions
        .register(&request.username, &request.email, &request.password)
        .await?;
    let (session, user) = app_state
        .sessions
        .login(&user.username, &request.password)
        .await?;

    Ok(ApiResponse::created(
        TokenResponse {
            token: session.token,
            user: UserProfile::from(&user),
        },
        "注册成功".to_string(),
    ))
}

/// 用户登录
#[utoipa::path(
    post,
    path = "/api/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "登录成功", body = TokenResponse),
        (status = 401, description = "用户名或密码错误")
    )
)]
pub async fn login(
    State(app_state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<ApiResponse<TokenResponse>>, AppError> {
    let (session, user) = app_state
        .sessions
        .login(&request.username, &request.password)
        .await?;

    Ok(Json(ApiResponse::success(TokenResponse {
        token: session.token,
        user: UserProfile::from(&user),
    })))
}

/// 注销当前令牌
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    tag = "auth",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "已注销"),
        (status = 401, description = "令牌无效或已过期")
    )
)]
pub async fn logout(
    State(app_state): State<AppState>,
    auth: AuthUser,
) -> Json<ApiResponse<()>> {
    app_state.sessions.logout(&auth.token);
    tracing::debug!("用户注销: {}", auth.user.username);
    Json(crate::ok_response!())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::tests::test_state;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_register_then_login() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir).await;

        let created = register(
            State(state.clone()),
            Json(RegisterRequest {
                username: "alice".to_string(),
                email: "alice@example.com".to_string(),
                password: "password1".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(created.code, 201);
        let registered = created.data.unwrap();
        assert!(state.sessions.authenticate(&registered.token).is_ok());

        let Json(response) = login(
            State(state.clone()),
            Json(LoginRequest {
                username: "alice".to_string(),
                password: "password1".to_string(),
            }),
        )
        .await
        .unwrap();
        let logged_in = response.data.unwrap();
        assert_eq!(logged_in.user.id, registered.user.id);
        assert_ne!(logged_in.token, registered.token);
    }

    #[tokio::test]
    async fn test_logout_invalidates_token() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir).await;
        let auth = crate::handlers::tests::login_as(&state, "carol").await;
        let token = auth.token.clone();

        let Json(response) = logout(State(state.clone()), auth).await;
        assert_eq!(response.code, 200);
        assert!(state.sessions.authenticate(&token).is_err());
    }
}
