//! 会话认证中间件
//! 受保护路由的准入闸门：认证通过的请求携带请求级身份进入 handler

use crate::{error::AppError, middleware::AppState};
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, Extensions, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use uuid::Uuid;

/// 请求级身份（附加到请求扩展）
///
/// 身份只存在于单个请求的生命周期内，不落全局状态，
/// 并发请求之间互不可见。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestIdentity {
    pub user_id: Uuid,
}

// 实现 FromRequestParts 以便在 handler 中直接提取 RequestIdentity
impl<S> FromRequestParts<S> for RequestIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        resolve_user_id(&parts.extensions, None).map(|user_id| RequestIdentity { user_id })
    }
}

/// 身份解析的唯一入口，优先级固定：
/// 请求扩展里的身份优先，其次是调用方显式传入的 fallback。
/// 两者都没有就是未认证，不做任何动态查找。
pub fn resolve_user_id(
    extensions: &Extensions,
    fallback: Option<Uuid>,
) -> Result<Uuid, AppError> {
    if let Some(identity) = extensions.get::<RequestIdentity>() {
        return Ok(identity.user_id);
    }

    fallback.ok_or(AppError::Unauthenticated)
}

/// 会话认证中间件 - 必须认证
///
/// 认证失败直接拒绝（fail-closed），绝不降级放行。
/// 认证产生的 Set-Cookie（滑动续签或轮换后的新令牌对）
/// 附加到下游 handler 的响应上。
pub async fn auth_gate(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let outcome = state.sessions.authenticate(req.headers()).await?;

    req.extensions_mut().insert(outcome.identity);

    let mut response = next.run(req).await;

    for cookie in &outcome.set_cookies {
        if let Ok(value) = HeaderValue::from_str(cookie) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }

    Ok(response)
}
