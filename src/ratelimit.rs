//! 限流服务
//! 双窗口令牌桶：短窗口压突发，长窗口压持续滥用
//!
//! 判定必须双桶同时扣减（both-or-nothing），任一窗口不足则整体拒绝
//! 且两个桶都不消耗，避免半扣减造成的计数漂移。

use crate::config::RateLimitConfig;
use crate::error::AppError;
use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::PgPool;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;

/// 内存限流桶的客户端键数量上限，超出时由维护任务触发淘汰
pub const MAX_TRACKED_CLIENTS: usize = 10_000;

/// 限流判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Limited { retry_after_secs: u64 },
}

#[derive(Debug, Error)]
pub enum RateLimitStoreError {
    #[error("rate limit store backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for RateLimitStoreError {
    fn from(e: sqlx::Error) -> Self {
        RateLimitStoreError::Backend(e.to_string())
    }
}

/// 双窗口的容量与补充速率，由配置换算得出
#[derive(Debug, Clone, Copy)]
pub struct BucketLimits {
    pub burst_capacity: f64,
    /// 短窗口每秒补充的令牌数
    pub burst_rate: f64,
    pub sustained_capacity: f64,
    /// 长窗口每秒补充的令牌数
    pub sustained_rate: f64,
}

impl BucketLimits {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            burst_capacity: config.burst_capacity as f64,
            burst_rate: config.burst_capacity as f64 / config.burst_window_secs as f64,
            sustained_capacity: config.sustained_capacity as f64,
            sustained_rate: config.sustained_capacity as f64
                / config.sustained_window_secs as f64,
        }
    }
}

/// 单个客户端的双桶状态
///
/// 令牌用 f64 连续补充，不做离散的窗口重置，
/// 这样边界上不会出现"窗口翻转瞬间双倍突发"。
#[derive(Debug, Clone, Copy)]
pub struct DualWindowBucket {
    pub burst_tokens: f64,
    pub sustained_tokens: f64,
}

impl DualWindowBucket {
    pub fn full(limits: &BucketLimits) -> Self {
        Self {
            burst_tokens: limits.burst_capacity,
            sustained_tokens: limits.sustained_capacity,
        }
    }

    /// 按流逝时间补充后尝试扣减一个令牌。
    /// 两个桶要么同时扣减，要么都不动。
    pub fn try_consume(&mut self, elapsed_secs: f64, limits: &BucketLimits) -> Decision {
        self.burst_tokens =
            (self.burst_tokens + elapsed_secs * limits.burst_rate).min(limits.burst_capacity);
        self.sustained_tokens = (self.sustained_tokens + elapsed_secs * limits.sustained_rate)
            .min(limits.sustained_capacity);

        if self.burst_tokens >= 1.0 && self.sustained_tokens >= 1.0 {
            self.burst_tokens -= 1.0;
            self.sustained_tokens -= 1.0;
            Decision::Allowed
        } else {
            Decision::Limited {
                retry_after_secs: self.retry_after_secs(limits),
            }
        }
    }

    /// 距离两个桶都恢复到至少 1 个令牌所需的秒数（向上取整，至少 1）
    fn retry_after_secs(&self, limits: &BucketLimits) -> u64 {
        let burst_wait = if self.burst_tokens >= 1.0 {
            0.0
        } else {
            (1.0 - self.burst_tokens) / limits.burst_rate
        };
        let sustained_wait = if self.sustained_tokens >= 1.0 {
            0.0
        } else {
            (1.0 - self.sustained_tokens) / limits.sustained_rate
        };

        (burst_wait.max(sustained_wait).ceil() as u64).max(1)
    }
}

/// 限流状态存储接口
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn try_consume(&self, client_key: &str) -> Result<Decision, RateLimitStoreError>;
}

// ==================== 内存实现 ====================

struct MemoryBucket {
    bucket: DualWindowBucket,
    refreshed_at: Instant,
}

pub struct MemoryRateLimitStore {
    limits: BucketLimits,
    buckets: DashMap<String, Mutex<MemoryBucket>>,
}

impl MemoryRateLimitStore {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            limits: BucketLimits::from_config(config),
            buckets: DashMap::new(),
        }
    }

    /// 防止客户端键无限增长：超出上限时丢弃一半。
    /// 被丢弃的客户端下次请求拿到全新的满桶，偏向放行而不是误杀。
    /// 由维护任务周期调用（见 main 的清扫循环）。
    pub fn evict_excess(&self, max_tracked: usize) {
        if self.buckets.len() > max_tracked {
            let keys: Vec<_> = self
                .buckets
                .iter()
                .take(max_tracked / 2)
                .map(|e| e.key().clone())
                .collect();
            let evicted = keys.len();
            for key in keys {
                self.buckets.remove(&key);
            }
            tracing::info!(evicted, "Rate limit buckets evicted");
        }
    }

    /// 当前跟踪的客户端键数量
    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn try_consume(&self, client_key: &str) -> Result<Decision, RateLimitStoreError> {
        let entry = self
            .buckets
            .entry(client_key.to_string())
            .or_insert_with(|| {
                Mutex::new(MemoryBucket {
                    bucket: DualWindowBucket::full(&self.limits),
                    refreshed_at: Instant::now(),
                })
            });

        let mut state = entry
            .lock()
            .map_err(|_| RateLimitStoreError::Backend("bucket mutex poisoned".to_string()))?;

        let now = Instant::now();
        let elapsed = now.duration_since(state.refreshed_at).as_secs_f64();
        state.refreshed_at = now;

        let limits = self.limits;
        Ok(state.bucket.try_consume(elapsed, &limits))
    }
}

// ==================== PostgreSQL 实现 ====================

/// 多实例部署时的共享限流状态。
/// 补充与扣减在单条语句内完成，并发请求靠行锁排队，
/// 不会出现两个实例同时扣到同一个令牌。
pub struct PgRateLimitStore {
    db: PgPool,
    limits: BucketLimits,
}

impl PgRateLimitStore {
    pub fn new(db: PgPool, config: &RateLimitConfig) -> Self {
        Self {
            db,
            limits: BucketLimits::from_config(config),
        }
    }
}

#[async_trait]
impl RateLimitStore for PgRateLimitStore {
    async fn try_consume(&self, client_key: &str) -> Result<Decision, RateLimitStoreError> {
        // 补充与扣减在同一条 INSERT ... ON CONFLICT DO UPDATE 内完成。
        // 同一行不能在一条语句里改两次（CTE 子句与外层共享快照，
        // 第二次修改会被静默跳过），所以准入判断放进冲突分支的 WHERE：
        // 新客户端插入已扣减的满桶；已有行按流逝时间补满后两桶都够
        // 才扣减，不够则整行不动，refreshed_at 也不前移。
        let consumed = sqlx::query_as::<_, (f64, f64)>(
            r#"
            INSERT INTO rate_limit_buckets (client_key, burst_tokens, sustained_tokens, refreshed_at)
            VALUES ($1, $2 - 1, $4 - 1, NOW())
            ON CONFLICT (client_key) DO UPDATE SET
                burst_tokens = LEAST($2, rate_limit_buckets.burst_tokens
                    + EXTRACT(EPOCH FROM (NOW() - rate_limit_buckets.refreshed_at)) * $3) - 1,
                sustained_tokens = LEAST($4, rate_limit_buckets.sustained_tokens
                    + EXTRACT(EPOCH FROM (NOW() - rate_limit_buckets.refreshed_at)) * $5) - 1,
                refreshed_at = NOW()
            WHERE LEAST($2, rate_limit_buckets.burst_tokens
                    + EXTRACT(EPOCH FROM (NOW() - rate_limit_buckets.refreshed_at)) * $3) >= 1
              AND LEAST($4, rate_limit_buckets.sustained_tokens
                    + EXTRACT(EPOCH FROM (NOW() - rate_limit_buckets.refreshed_at)) * $5) >= 1
            RETURNING burst_tokens, sustained_tokens
            "#,
        )
        .bind(client_key)
        .bind(self.limits.burst_capacity)
        .bind(self.limits.burst_rate)
        .bind(self.limits.sustained_capacity)
        .bind(self.limits.sustained_rate)
        .fetch_optional(&self.db)
        .await?;

        if consumed.is_some() {
            return Ok(Decision::Allowed);
        }

        // 拒绝路径没有写入，余额是上次扣减时的快照，
        // 在本地补满后再估算退避时间
        let remaining = sqlx::query_as::<_, (f64, f64, f64)>(
            r#"
            SELECT burst_tokens, sustained_tokens,
                   EXTRACT(EPOCH FROM (NOW() - refreshed_at))::float8
            FROM rate_limit_buckets
            WHERE client_key = $1
            "#,
        )
        .bind(client_key)
        .fetch_optional(&self.db)
        .await?;

        let bucket = match remaining {
            Some((burst_tokens, sustained_tokens, elapsed_secs)) => DualWindowBucket {
                burst_tokens: (burst_tokens + elapsed_secs * self.limits.burst_rate)
                    .min(self.limits.burst_capacity),
                sustained_tokens: (sustained_tokens + elapsed_secs * self.limits.sustained_rate)
                    .min(self.limits.sustained_capacity),
            },
            None => DualWindowBucket::full(&self.limits),
        };

        Ok(Decision::Limited {
            retry_after_secs: bucket.retry_after_secs(&self.limits),
        })
    }
}

// ==================== 限流器（fail-open 包装） ====================

/// 限流器对外入口
///
/// 存储后端故障时放行（fail-open）：限流是保护措施而不是准入条件，
/// 后端抖动不应该演变成全站 429。降级会记日志和指标，
/// 与认证路径的 fail-closed 形成有意的不对称。
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>) -> Self {
        Self { store }
    }

    pub async fn check(&self, client_key: &str) -> Decision {
        match self.store.try_consume(client_key).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(
                    client_key = %client_key,
                    error = %e,
                    "Rate limit store unavailable, failing open"
                );
                metrics::counter!("rate_limiter_degraded_total").increment(1);
                Decision::Allowed
            }
        }
    }
}

/// 拒绝判定转换为应用错误
pub fn reject(decision: Decision) -> Result<(), AppError> {
    match decision {
        Decision::Allowed => Ok(()),
        Decision::Limited { retry_after_secs } => {
            Err(AppError::RateLimited { retry_after_secs })
        }
    }
}
