//! 路由注册
//! 创建所有 API 路由并应用中间件

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

use crate::{handlers, middleware::AppState};

/// 请求体上限。网关只接收小的 JSON 载荷（登录的授权码），
/// 超出直接 413，不让大请求体占用连接。
const MAX_BODY_BYTES: usize = 16 * 1024;

/// 创建应用路由
///
/// 中间件层次（从外到内）：
/// 请求追踪 → 限流 → [受保护路由才有] 会话认证
///
/// 限流作用于全部请求，公开端点也不例外；
/// 认证只作用于受保护路由。
pub fn create_router(state: Arc<AppState>) -> Router {
    // 公开端点：探针和登录入口，可匿名访问但仍被限流
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/api/v1/auth/login-url", get(handlers::auth::login_url))
        .route("/api/v1/auth/login", post(handlers::auth::login));

    // 受保护端点：会话认证闸门之内
    let protected_routes = Router::new()
        .route("/api/v1/auth/me", get(handlers::auth::get_current_user))
        .route("/api/v1/auth/logout", post(handlers::auth::logout))
        .route("/api/v1/auth/logout-all", post(handlers::auth::logout_all))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::auth::middleware::auth_gate,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::rate_limit_middleware,
        ))
        .layer(axum::middleware::from_fn(crate::middleware::request_tracking_middleware))
        .with_state(state)
}
