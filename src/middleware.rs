//! HTTP 中间件
//! 请求追踪、限流闸门、客户端标识提取

use crate::{
    auth::IdentityExchanger,
    error::AppError,
    ratelimit::{self, RateLimiter},
    repository::UserDirectory,
    services::SessionAuthenticator,
};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

/// 应用状态
///
/// AppState 内部使用 Arc 包装服务,这样:
/// 1. 多个请求可以共享服务实例
/// 2. 服务可以包含内部的可变状态(如果需要)
/// 3. Clone 成本低廉(Arc 是指针拷贝)
#[derive(Clone)]
pub struct AppState {
    pub config: crate::config::AppConfig,
    pub db: sqlx::PgPool,
    pub sessions: Arc<SessionAuthenticator>,
    pub rate_limiter: Arc<RateLimiter>,
    pub users: Arc<dyn UserDirectory>,
    pub identity_exchanger: Arc<dyn IdentityExchanger>,
}

/// 请求追踪中间件
/// 为每个请求生成 trace_id 和 request_id，并记录指标
pub async fn request_tracking_middleware(req: Request, next: Next) -> Response {
    let trace_id = extract_or_generate_trace_id(req.headers());
    let request_id = Uuid::new_v4().to_string();

    let method = req.method().to_string();
    let uri = req.uri().to_string();

    let span = tracing::info_span!(
        "http_request",
        trace_id = %trace_id,
        request_id = %request_id,
        method = %method,
        uri = %uri,
    );

    async move {
        let start = Instant::now();

        let response = next.run(req).await;

        let elapsed = start.elapsed();
        let status = response.status().as_u16();

        let status_code = match status {
            200 => "200",
            201 => "201",
            204 => "204",
            400 => "400",
            401 => "401",
            404 => "404",
            429 => "429",
            500 => "500",
            _ => "other",
        };

        metrics::counter!("http_requests_total", "status" => status_code).increment(1);
        metrics::histogram!("http_request_duration_seconds").record(elapsed.as_secs_f64());

        tracing::info!(
            method = %method,
            uri = %uri,
            status = status,
            elapsed_ms = elapsed.as_millis(),
            "Request completed"
        );

        let mut response = response;
        if let Ok(value) = trace_id.parse() {
            response.headers_mut().insert("x-trace-id", value);
        }
        if let Ok(value) = request_id.parse() {
            response.headers_mut().insert("x-request-id", value);
        }

        response
    }
    .instrument(span)
    .await
}

/// 从请求头中提取或生成 trace_id
fn extract_or_generate_trace_id(headers: &HeaderMap) -> String {
    headers
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// 限流中间件
///
/// 挂在所有路由的最外层：公开接口同样计数，
/// 未认证流量不能绕过限流。超限返回 429 并带 Retry-After。
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let client_key = client_key(&req, state.config.security.trust_proxy);

    let decision = state.rate_limiter.check(&client_key).await;

    if let crate::ratelimit::Decision::Limited { retry_after_secs } = decision {
        tracing::warn!(
            client_key = %client_key,
            uri = %req.uri().path(),
            retry_after_secs,
            "Rate limit exceeded"
        );
        metrics::counter!("rate_limit_rejections_total").increment(1);
    }

    ratelimit::reject(decision)?;

    Ok(next.run(req).await)
}

/// 计算限流用的客户端键
///
/// 信任代理时优先 X-Forwarded-For 的第一个地址（最原始的客户端），
/// 解析失败或未配置代理则退回连接对端地址。
/// 两者都拿不到时归入回环地址的共享桶并告警，绝不放弃计数。
pub fn client_key(req: &Request, trust_proxy: bool) -> String {
    if trust_proxy {
        if let Some(ip) = forwarded_client_ip(req.headers()) {
            return ip.to_string();
        }
    }

    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    tracing::warn!("Could not determine client address, using loopback bucket");
    IpAddr::V4(Ipv4Addr::LOCALHOST).to_string()
}

fn forwarded_client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let forwarded = headers.get("x-forwarded-for")?.to_str().ok()?;
    let first = forwarded.split(',').next()?.trim();
    first.parse::<IpAddr>().ok()
}
