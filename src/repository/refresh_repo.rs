//! 刷新令牌存储
//! 单次使用的长期凭证：原子轮换、复用即冲突、过期即拒绝

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use thiserror::Error;
use uuid::Uuid;

/// 存储层错误。`Conflict` 表示出示的 code 与当前 code 不一致，
/// 包括并发轮换中落败的一方；调用方将其视为复用信号，不得用新值重试。
#[derive(Debug, Error)]
pub enum RefreshStoreError {
    #[error("refresh token record not found")]
    NotFound,

    #[error("refresh token record expired")]
    Expired,

    #[error("refresh code mismatch")]
    Conflict,

    #[error("refresh store backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for RefreshStoreError {
    fn from(e: sqlx::Error) -> Self {
        RefreshStoreError::Backend(e.to_string())
    }
}

/// 新建记录的返回：记录 id 与明文 code（明文只在此处出现一次）
#[derive(Debug)]
pub struct IssuedRefreshToken {
    pub record_id: Uuid,
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

/// 轮换成功的返回
#[derive(Debug)]
pub struct RotatedRefreshToken {
    pub user_id: Uuid,
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

/// 刷新令牌持久化接口
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// 生成随机 code 并持久化一条新记录
    async fn create(&self, user_id: Uuid) -> Result<IssuedRefreshToken, RefreshStoreError>;

    /// 原子轮换：出示的 code 与当前 code 一致时，替换为新随机值并续期。
    /// 两个并发调用至多一个成功，落败方收到 `Conflict`。
    async fn rotate(
        &self,
        record_id: Uuid,
        presented_code: &str,
    ) -> Result<RotatedRefreshToken, RefreshStoreError>;

    /// 删除单条记录（登出）
    async fn revoke(&self, record_id: Uuid) -> Result<bool, RefreshStoreError>;

    /// 删除用户名下所有记录（全端登出 / 删号）
    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, RefreshStoreError>;

    /// 清理过期记录（维护任务）
    async fn delete_expired(&self) -> Result<u64, RefreshStoreError>;
}

/// 生成不透明随机 code：32 字节随机数，URL-safe base64 无填充
fn generate_code() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// code 入库前哈希，库里不存明文
pub fn hash_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ==================== PostgreSQL 实现 ====================

pub struct PgRefreshTokenStore {
    db: PgPool,
    ttl: Duration,
}

impl PgRefreshTokenStore {
    pub fn new(db: PgPool, ttl_secs: u64) -> Self {
        Self { db, ttl: Duration::seconds(ttl_secs as i64) }
    }
}

#[async_trait]
impl RefreshTokenStore for PgRefreshTokenStore {
    async fn create(&self, user_id: Uuid) -> Result<IssuedRefreshToken, RefreshStoreError> {
        let record_id = Uuid::new_v4();
        let code = generate_code();
        let expires_at = Utc::now() + self.ttl;

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, user_id, code_hash, created_at, expires_at)
            VALUES ($1, $2, $3, NOW(), $4)
            "#,
        )
        .bind(record_id)
        .bind(user_id)
        .bind(hash_code(&code))
        .bind(expires_at)
        .execute(&self.db)
        .await?;

        Ok(IssuedRefreshToken { record_id, code, expires_at })
    }

    async fn rotate(
        &self,
        record_id: Uuid,
        presented_code: &str,
    ) -> Result<RotatedRefreshToken, RefreshStoreError> {
        let new_code = generate_code();
        let expires_at = Utc::now() + self.ttl;

        // 条件更新保证原子性：WHERE 里同时比较 code 和过期时间，
        // 并发轮换只有一个调用能命中行
        let row = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET code_hash = $3, rotated_at = NOW(), expires_at = $4
            WHERE id = $1 AND code_hash = $2 AND expires_at > NOW()
            RETURNING user_id
            "#,
        )
        .bind(record_id)
        .bind(hash_code(presented_code))
        .bind(hash_code(&new_code))
        .bind(expires_at)
        .fetch_optional(&self.db)
        .await?;

        if let Some(row) = row {
            let user_id: Uuid = row.get("user_id");
            return Ok(RotatedRefreshToken { user_id, code: new_code, expires_at });
        }

        // 未命中：区分记录缺失、过期与 code 不一致。
        // 这次读取只用于错误分类，三种情况都拒绝。
        let record = sqlx::query("SELECT expires_at FROM refresh_tokens WHERE id = $1")
            .bind(record_id)
            .fetch_optional(&self.db)
            .await?;

        match record {
            None => Err(RefreshStoreError::NotFound),
            Some(row) => {
                let record_expires_at: DateTime<Utc> = row.get("expires_at");
                if record_expires_at <= Utc::now() {
                    Err(RefreshStoreError::Expired)
                } else {
                    Err(RefreshStoreError::Conflict)
                }
            }
        }
    }

    async fn revoke(&self, record_id: Uuid) -> Result<bool, RefreshStoreError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE id = $1")
            .bind(record_id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, RefreshStoreError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }

    async fn delete_expired(&self) -> Result<u64, RefreshStoreError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < NOW()")
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }
}

// ==================== 内存实现（测试与单机开发） ====================

struct MemoryRecord {
    user_id: Uuid,
    code_hash: String,
    expires_at: DateTime<Utc>,
}

/// 基于 DashMap 的内存实现。`get_mut` 持有分片写锁，
/// 比较与替换在锁内完成，轮换语义与数据库实现一致。
pub struct MemoryRefreshTokenStore {
    records: DashMap<Uuid, MemoryRecord>,
    ttl_secs: i64,
}

impl MemoryRefreshTokenStore {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            records: DashMap::new(),
            ttl_secs: ttl_secs as i64,
        }
    }

    /// 测试辅助：直接覆盖记录过期时间
    pub fn force_expire(&self, record_id: Uuid) {
        if let Some(mut record) = self.records.get_mut(&record_id) {
            record.expires_at = Utc::now() - Duration::seconds(1);
        }
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryRefreshTokenStore {
    async fn create(&self, user_id: Uuid) -> Result<IssuedRefreshToken, RefreshStoreError> {
        let record_id = Uuid::new_v4();
        let code = generate_code();
        let expires_at = Utc::now() + Duration::seconds(self.ttl_secs);

        self.records.insert(
            record_id,
            MemoryRecord {
                user_id,
                code_hash: hash_code(&code),
                expires_at,
            },
        );

        Ok(IssuedRefreshToken { record_id, code, expires_at })
    }

    async fn rotate(
        &self,
        record_id: Uuid,
        presented_code: &str,
    ) -> Result<RotatedRefreshToken, RefreshStoreError> {
        let mut record = self
            .records
            .get_mut(&record_id)
            .ok_or(RefreshStoreError::NotFound)?;

        if record.expires_at <= Utc::now() {
            return Err(RefreshStoreError::Expired);
        }

        if record.code_hash != hash_code(presented_code) {
            return Err(RefreshStoreError::Conflict);
        }

        let new_code = generate_code();
        let expires_at = Utc::now() + Duration::seconds(self.ttl_secs);
        record.code_hash = hash_code(&new_code);
        record.expires_at = expires_at;

        Ok(RotatedRefreshToken {
            user_id: record.user_id,
            code: new_code,
            expires_at,
        })
    }

    async fn revoke(&self, record_id: Uuid) -> Result<bool, RefreshStoreError> {
        Ok(self.records.remove(&record_id).is_some())
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, RefreshStoreError> {
        let before = self.records.len();
        self.records.retain(|_, record| record.user_id != user_id);
        Ok((before - self.records.len()) as u64)
    }

    async fn delete_expired(&self) -> Result<u64, RefreshStoreError> {
        let now = Utc::now();
        let before = self.records.len();
        self.records.retain(|_, record| record.expires_at > now);
        Ok((before - self.records.len()) as u64)
    }
}
