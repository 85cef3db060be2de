use std::net::SocketAddr;
use std::sync::Arc;
use taskhub::{
    auth::{
        jwt::TokenCodec, secrets::ConfigSecretProvider, DevIdentityExchanger, IdentityExchanger,
    },
    config::AppConfig,
    db,
    handlers::health,
    middleware::AppState,
    ratelimit::{MemoryRateLimitStore, PgRateLimitStore, RateLimitStore, RateLimiter},
    repository::{PgRefreshTokenStore, PgUserDirectory, RefreshTokenStore, UserDirectory},
    routes,
    services::SessionAuthenticator,
    telemetry,
};
use tokio::net::TcpListener;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Ok(path) = std::env::var("TASKHUB_ENV") {
        dotenv::from_filename(format!(".env.{}", path)).ok();
    } else {
        dotenv::from_filename(".env.local").ok();
        dotenv::dotenv().ok();
    }

    health::set_start_time();

    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        anyhow::anyhow!("Failed to load configuration: {}", e)
    })?;

    telemetry::init_telemetry(&config);
    telemetry::init_metrics();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Taskhub gateway starting...");

    let db_pool = db::create_pool(&config.database).await?;
    db::run_migrations(&db_pool).await?;

    tracing::info!("Database initialized");

    let refresh_store: Arc<dyn RefreshTokenStore> = Arc::new(PgRefreshTokenStore::new(
        db_pool.clone(),
        config.security.refresh_token_ttl_secs,
    ));
    let users: Arc<dyn UserDirectory> = Arc::new(PgUserDirectory::new(db_pool.clone()));

    let codec = TokenCodec::new(Arc::new(ConfigSecretProvider::new(&config.security)))
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    let sessions = Arc::new(SessionAuthenticator::new(
        codec,
        refresh_store.clone(),
        users.clone(),
        &config.security,
    ));

    // 限流状态存储：单实例用内存，多实例共享用 postgres。
    // 内存存储额外保留一个具体类型句柄，供维护任务做键淘汰。
    let (rate_limit_store, memory_limit_store): (
        Arc<dyn RateLimitStore>,
        Option<Arc<MemoryRateLimitStore>>,
    ) = match config.rate_limit.store.as_str() {
        "postgres" => (
            Arc::new(PgRateLimitStore::new(db_pool.clone(), &config.rate_limit)),
            None,
        ),
        _ => {
            let store = Arc::new(MemoryRateLimitStore::new(&config.rate_limit));
            (store.clone(), Some(store))
        }
    };
    let rate_limiter = Arc::new(RateLimiter::new(rate_limit_store));

    let identity_exchanger: Arc<dyn IdentityExchanger> = if config.security.dev_login {
        tracing::warn!("Dev login enabled, do not use in production");
        Arc::new(DevIdentityExchanger::new(&config.security.dev_login_subject))
    } else {
        anyhow::bail!(
            "No identity provider configured. Set TASKHUB_SECURITY__DEV_LOGIN=true for local development."
        );
    };

    let app_state = Arc::new(AppState {
        config: config.clone(),
        db: db_pool.clone(),
        sessions,
        rate_limiter,
        users,
        identity_exchanger,
    });

    let app = routes::create_router(app_state.clone());

    // 后台清扫：每小时删除过期的刷新记录，并压缩限流桶的键空间
    let sweeper_store = refresh_store.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(3600));
        interval.tick().await;
        loop {
            interval.tick().await;
            match sweeper_store.delete_expired().await {
                Ok(deleted) if deleted > 0 => {
                    tracing::info!(deleted, "Expired refresh records swept");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Refresh record sweep failed");
                }
            }

            if let Some(store) = &memory_limit_store {
                store.evict_excess(taskhub::ratelimit::MAX_TRACKED_CLIENTS);
                tracing::debug!(
                    tracked = store.tracked_clients(),
                    "Rate limit bucket count after sweep"
                );
            }
        }
    });

    let addr = &config.server.addr;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(addr = %addr, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(config.server.graceful_shutdown_timeout_secs))
    .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Terminate signal received, starting graceful shutdown");
        },
    }

    tokio::time::sleep(tokio::time::Duration::from_secs(timeout_secs)).await;
    tracing::warn!("Graceful shutdown timeout reached, forcing exit");
}
