//! 日志与追踪系统
//! 初始化结构化日志，登记网关自己的指标

use crate::config::AppConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// 初始化日志与追踪系统
pub fn init_telemetry(config: &AppConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    // json 给生产环境的日志采集，pretty 给本地开发
    let log_layer = match config.logging.format.to_lowercase().as_str() {
        "json" => tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
            .boxed(),
        "pretty" => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(false)
            .boxed(),
        _ => tracing_subscriber::fmt::layer().with_target(false).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(log_layer)
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        level = %config.logging.level,
        format = %config.logging.format,
        "Telemetry initialized"
    );
}

/// 登记网关指标的描述信息。
/// 指标本身在首次使用时自动创建，这里只挂说明文字。
pub fn init_metrics() {
    metrics::describe_counter!(
        "http_requests_total",
        "Completed HTTP requests by status class"
    );
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request latency in seconds"
    );
    metrics::describe_counter!("auth_logins_total", "Sessions established via login");
    metrics::describe_counter!(
        "auth_refresh_rotations_total",
        "Successful refresh token rotations"
    );
    metrics::describe_counter!(
        "auth_integrity_violations_total",
        "Refresh reuse or malformed refresh cookies, treated as theft signals"
    );
    metrics::describe_counter!(
        "rate_limit_rejections_total",
        "Requests rejected by the rate limiter"
    );
    metrics::describe_counter!(
        "rate_limiter_degraded_total",
        "Rate limit checks that failed open due to a store error"
    );

    tracing::debug!("Metrics descriptions registered");
}
