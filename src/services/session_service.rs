//! 会话认证服务
//! 组织访问令牌校验与刷新令牌轮换，产出请求级身份
//!
//! 单次请求内的状态流转：
//! 无凭证 → 校验访问令牌 → 认证成功（滑动续签 Cookie）
//! 校验失败/缺失 → 尝试刷新（每个请求最多一次）→ 认证成功 | 拒绝

use crate::{
    auth::{
        cookie::{
            build_cookie, clear_cookie, format_refresh_value, get_cookie, parse_refresh_value,
            ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME,
        },
        jwt::{TokenCodec, TokenError},
        middleware::RequestIdentity,
    },
    config::SecurityConfig,
    error::AppError,
    models::user::User,
    repository::{RefreshStoreError, RefreshTokenStore, UserDirectory},
};
use axum::http::HeaderMap;
use chrono::Duration;
use std::sync::Arc;
use uuid::Uuid;

/// 认证成功的产出：请求级身份 + 需要写回的 Set-Cookie
pub struct AuthOutcome {
    pub identity: RequestIdentity,
    pub set_cookies: Vec<String>,
}

pub struct SessionAuthenticator {
    codec: TokenCodec,
    store: Arc<dyn RefreshTokenStore>,
    users: Arc<dyn UserDirectory>,
    access_ttl_secs: u64,
    refresh_ttl_secs: u64,
}

impl SessionAuthenticator {
    pub fn new(
        codec: TokenCodec,
        store: Arc<dyn RefreshTokenStore>,
        users: Arc<dyn UserDirectory>,
        config: &SecurityConfig,
    ) -> Self {
        Self {
            codec,
            store,
            users,
            access_ttl_secs: config.access_token_ttl_secs,
            refresh_ttl_secs: config.refresh_token_ttl_secs,
        }
    }

    /// 按请求认证。失败语义：任何拒绝都原样上抛，
    /// 本服务内部不做任何自动重试，刷新每个请求只尝试一次。
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<AuthOutcome, AppError> {
        let access_token = get_cookie(headers, ACCESS_COOKIE_NAME);
        let refresh_value = get_cookie(headers, REFRESH_COOKIE_NAME);

        if let Some(token) = access_token {
            match self.codec.verify(token) {
                Ok(claims) => {
                    let user_id = Uuid::parse_str(&claims.sub)
                        .map_err(|_| AppError::Unauthenticated)?;
                    let user = self.resolve_active_user(user_id).await?;

                    // 滑动续签：校验成功就重发 Cookie，活跃会话的剩余寿命随之前移
                    let jwt = self.sign_access_cookie(&user.id)?;
                    return Ok(AuthOutcome {
                        identity: RequestIdentity { user_id: user.id },
                        set_cookies: vec![jwt],
                    });
                }
                Err(TokenError::Expired) => {
                    tracing::debug!("Access token expired, attempting refresh");
                }
                Err(TokenError::InvalidSignature) => {
                    tracing::debug!("Access token rejected, attempting refresh");
                }
            }
        }

        let Some(refresh_value) = refresh_value else {
            return Err(AppError::Unauthenticated);
        };

        self.refresh_session(refresh_value).await
    }

    /// 刷新路径：解析 Cookie → 原子轮换 → 签发新令牌对
    async fn refresh_session(&self, cookie_value: &str) -> Result<AuthOutcome, AppError> {
        let Some((record_id, presented_code)) = parse_refresh_value(cookie_value) else {
            tracing::warn!("Malformed refresh cookie, treating as integrity violation");
            metrics::counter!("auth_integrity_violations_total").increment(1);
            return Err(AppError::IntegrityViolation);
        };

        match self.store.rotate(record_id, presented_code).await {
            Ok(rotated) => {
                let user = self.resolve_active_user(rotated.user_id).await?;

                metrics::counter!("auth_refresh_rotations_total").increment(1);
                tracing::debug!(user_id = %user.id, record_id = %record_id, "Refresh token rotated");

                let jwt = self.sign_access_cookie(&user.id)?;
                let refresh = build_cookie(
                    REFRESH_COOKIE_NAME,
                    &format_refresh_value(record_id, &rotated.code),
                    self.refresh_ttl_secs,
                );

                Ok(AuthOutcome {
                    identity: RequestIdentity { user_id: user.id },
                    set_cookies: vec![jwt, refresh],
                })
            }
            // code 不一致即复用信号：可能是被盗 Cookie 的重放，
            // 也可能是并发轮换的落败方。两者都拒绝，不做静默恢复。
            Err(RefreshStoreError::Conflict) => {
                tracing::warn!(
                    record_id = %record_id,
                    "Refresh code mismatch, possible credential reuse"
                );
                metrics::counter!("auth_integrity_violations_total").increment(1);
                Err(AppError::IntegrityViolation)
            }
            Err(RefreshStoreError::NotFound) | Err(RefreshStoreError::Expired) => {
                tracing::debug!(record_id = %record_id, "Refresh record absent or expired");
                Err(AppError::Unauthenticated)
            }
            Err(RefreshStoreError::Backend(e)) => Err(AppError::Internal(e)),
        }
    }

    /// 建立新会话（登录成功后调用）：新建刷新记录，签发两个 Cookie
    pub async fn establish(&self, user_id: Uuid) -> Result<AuthOutcome, AppError> {
        let issued = self
            .store
            .create(user_id)
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?;

        tracing::info!(user_id = %user_id, record_id = %issued.record_id, "Session established");

        let jwt = self.sign_access_cookie(&user_id)?;
        let refresh = build_cookie(
            REFRESH_COOKIE_NAME,
            &format_refresh_value(issued.record_id, &issued.code),
            self.refresh_ttl_secs,
        );

        Ok(AuthOutcome {
            identity: RequestIdentity { user_id },
            set_cookies: vec![jwt, refresh],
        })
    }

    /// 终止当前会话：撤销刷新记录，返回清除用的 Set-Cookie
    pub async fn terminate(&self, headers: &HeaderMap) -> Result<Vec<String>, AppError> {
        if let Some(value) = get_cookie(headers, REFRESH_COOKIE_NAME) {
            if let Some((record_id, _)) = parse_refresh_value(value) {
                let removed = self
                    .store
                    .revoke(record_id)
                    .await
                    .map_err(|e| AppError::Internal(e.to_string()))?;
                if removed {
                    tracing::info!(record_id = %record_id, "Refresh record revoked on logout");
                }
            }
        }

        Ok(vec![
            clear_cookie(ACCESS_COOKIE_NAME),
            clear_cookie(REFRESH_COOKIE_NAME),
        ])
    }

    /// 终止用户的所有会话
    pub async fn terminate_all(&self, user_id: Uuid) -> Result<u64, AppError> {
        let revoked = self
            .store
            .revoke_all_for_user(user_id)
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?;

        tracing::info!(user_id = %user_id, revoked, "All sessions revoked for user");
        Ok(revoked)
    }

    fn sign_access_cookie(&self, user_id: &Uuid) -> Result<String, AppError> {
        let token = self
            .codec
            .sign(user_id, Duration::seconds(self.access_ttl_secs as i64))?;

        // Cookie Max-Age 与令牌签名内的过期时间一致，单一生命周期策略
        Ok(build_cookie(ACCESS_COOKIE_NAME, &token, self.access_ttl_secs))
    }

    /// subject 解析：用户必须存在且处于 active 状态
    async fn resolve_active_user(&self, user_id: Uuid) -> Result<User, AppError> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AppError::Unauthenticated)?;

        if !user.is_active() {
            tracing::debug!(user_id = %user_id, status = %user.status, "User not active");
            return Err(AppError::Unauthenticated);
        }

        Ok(user)
    }
}
