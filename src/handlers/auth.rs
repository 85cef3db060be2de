//! 认证处理器
//! 登录、登出、当前用户查询

use crate::{
    auth::middleware::RequestIdentity,
    error::AppError,
    middleware::AppState,
    models::{
        session::{LoginRequest, LoginUrlResponse, LogoutResponse},
        user::UserResponse,
    },
};
use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

/// 把会话 Cookie 附加到响应上
fn with_cookies(mut response: Response, cookies: &[String]) -> Response {
    for cookie in cookies {
        if let Ok(value) = HeaderValue::from_str(cookie) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
    response
}

/// 获取身份提供方的登录入口
pub async fn login_url(State(state): State<Arc<AppState>>) -> Json<LoginUrlResponse> {
    Json(LoginUrlResponse {
        login_url: state.identity_exchanger.login_url(),
    })
}

/// 登录：用授权码换取外部身份，建立本地会话
///
/// 外部身份没有对应的本地用户、或用户已停用时，
/// 一律返回认证失败，不暴露用户是否存在。
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Response, AppError> {
    if payload.code.trim().is_empty() {
        return Err(AppError::validation("Authorization code is required"));
    }

    let identity = state.identity_exchanger.exchange_code(&payload.code).await?;

    let user = state
        .users
        .find_by_external_identity(&identity.provider, &identity.subject)
        .await?
        .ok_or_else(|| {
            tracing::warn!(
                provider = %identity.provider,
                subject = %identity.subject,
                "Login rejected, no local user for external identity"
            );
            AppError::Unauthenticated
        })?;

    if !user.is_active() {
        tracing::warn!(user_id = %user.id, status = %user.status, "Login rejected, user not active");
        return Err(AppError::Unauthenticated);
    }

    let outcome = state.sessions.establish(user.id).await?;

    metrics::counter!("auth_logins_total").increment(1);

    let response = Json(UserResponse::from(user)).into_response();
    Ok(with_cookies(response, &outcome.set_cookies))
}

/// 获取当前用户信息
pub async fn get_current_user(
    State(state): State<Arc<AppState>>,
    identity: RequestIdentity,
) -> Result<Json<UserResponse>, AppError> {
    let user = state
        .users
        .find_by_id(identity.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("user", identity.user_id.to_string()))?;

    Ok(Json(UserResponse::from(user)))
}

/// 登出：撤销当前刷新记录并清除 Cookie
pub async fn logout(
    State(state): State<Arc<AppState>>,
    identity: RequestIdentity,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let clearing = state.sessions.terminate(&headers).await?;

    tracing::info!(user_id = %identity.user_id, "User logged out");

    let response = Json(LogoutResponse {
        message: "Logged out".to_string(),
    })
    .into_response();
    Ok(with_cookies(response, &clearing))
}

/// 全端登出：撤销该用户的所有刷新记录
pub async fn logout_all(
    State(state): State<Arc<AppState>>,
    identity: RequestIdentity,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let revoked = state.sessions.terminate_all(identity.user_id).await?;
    let clearing = state.sessions.terminate(&headers).await?;

    let response = Json(LogoutResponse {
        message: format!("Logged out of {} sessions", revoked),
    })
    .into_response();
    Ok(with_cookies(response, &clearing))
}
