//! 签名密钥获取
//! 密钥由外部密钥服务提供，进程内只缓存当前值

use crate::{config::SecurityConfig, error::AppError};
use secrecy::{ExposeSecret, Secret};

/// 密钥提供方。生产部署可以对接外部密钥管理服务，
/// 实现方只需返回“当前”签名密钥；编解码器不做额外缓存，
/// 密钥轮换通过重建 `TokenCodec` 完成。
pub trait SecretProvider: Send + Sync {
    fn current_signing_key(&self) -> Result<Secret<String>, AppError>;
}

/// 从配置读取密钥的默认实现
pub struct ConfigSecretProvider {
    key: Secret<String>,
}

impl ConfigSecretProvider {
    pub fn new(config: &SecurityConfig) -> Self {
        Self { key: config.jwt_secret.clone() }
    }

    /// 测试与工具代码使用的直接构造
    pub fn from_key(key: &str) -> Self {
        Self { key: Secret::new(key.to_string()) }
    }
}

impl SecretProvider for ConfigSecretProvider {
    fn current_signing_key(&self) -> Result<Secret<String>, AppError> {
        Ok(Secret::new(self.key.expose_secret().clone()))
    }
}
