//! 访问令牌编解码
//! 自包含的 HS256 签名令牌：claims + 过期时间 + 签名，校验不查库

use crate::{auth::secrets::SecretProvider, error::AppError};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// 访问令牌 claims
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,

    /// Issued at
    pub iat: i64,

    /// Expiration
    pub exp: i64,

    /// JWT ID (unique token identifier)
    pub jti: String,
}

/// 令牌校验错误。编解码器层面永不重试，
/// 是否转入刷新流程由调用方决定。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("invalid token signature")]
    InvalidSignature,

    #[error("token expired")]
    Expired,
}

/// 令牌编解码器
///
/// 密钥在构造时从 `SecretProvider` 取一次；密钥轮换时重建实例，
/// 进程内使用中的密钥不做原地修改。
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenCodec {
    pub fn new(secrets: Arc<dyn SecretProvider>) -> Result<Self, AppError> {
        let secret = secrets.current_signing_key()?;
        let secret = secret.expose_secret();

        // HS256 密钥至少 32 字节
        if secret.len() < 32 {
            return Err(AppError::Config("JWT secret too short (min 32 chars)".to_string()));
        }

        // 过期检查由编解码器自己做（零容差），jsonwebtoken 默认带 60 秒 leeway
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims = Default::default();

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    /// 签发访问令牌：key + 输入 + 当前时间的纯函数，无副作用
    pub fn sign(&self, subject: &Uuid, ttl: Duration) -> Result<String, AppError> {
        self.sign_at(subject, ttl, Utc::now())
    }

    /// 在指定时刻签发令牌（确定性测试用）
    pub fn sign_at(
        &self,
        subject: &Uuid,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<String, AppError> {
        let claims = Claims {
            sub: subject.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| {
            tracing::error!("Failed to encode access token: {:?}", e);
            AppError::Internal(format!("Failed to encode access token: {}", e))
        })
    }

    /// 校验令牌：签名不匹配返回 `InvalidSignature`，
    /// `now >= exp` 返回 `Expired`。不做其他 claim 语义检查。
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_at(token, Utc::now())
    }

    /// 在指定时刻校验令牌（确定性测试用）
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| {
                tracing::debug!("Token validation failed: {:?}", e);
                TokenError::InvalidSignature
            })?
            .claims;

        if now.timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::secrets::ConfigSecretProvider;

    fn test_codec() -> TokenCodec {
        let provider = Arc::new(ConfigSecretProvider::from_key(
            "test_secret_key_32_characters_long!",
        ));
        TokenCodec::new(provider).unwrap()
    }

    #[test]
    fn test_sign_and_verify_roundtrip() {
        let codec = test_codec();
        let user_id = Uuid::new_v4();

        let token = codec.sign(&user_id, Duration::seconds(900)).unwrap();
        let claims = codec.verify(&token).unwrap();

        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.exp - claims.iat, 900);
        assert!(!claims.jti.is_empty());
    }

    #[test]
    fn test_expiry_boundary() {
        let codec = test_codec();
        let user_id = Uuid::new_v4();
        let issued = Utc::now();

        let token = codec
            .sign_at(&user_id, Duration::seconds(20), issued)
            .unwrap();

        // issued + T - 1 仍然有效
        assert!(codec
            .verify_at(&token, issued + Duration::seconds(19))
            .is_ok());

        // issued + T 整点即过期
        assert_eq!(
            codec.verify_at(&token, issued + Duration::seconds(20)),
            Err(TokenError::Expired)
        );

        assert_eq!(
            codec.verify_at(&token, issued + Duration::seconds(25)),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_tampered_token_is_invalid_signature() {
        let codec = test_codec();
        let user_id = Uuid::new_v4();

        let mut token = codec.sign(&user_id, Duration::seconds(900)).unwrap();
        let last_char = token.chars().last().unwrap();
        let new_char = if last_char == 'a' { 'b' } else { 'a' };
        token.pop();
        token.push(new_char);

        assert_eq!(codec.verify(&token), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_garbage_token_is_invalid_signature() {
        let codec = test_codec();
        assert_eq!(codec.verify("invalid"), Err(TokenError::InvalidSignature));
        assert_eq!(codec.verify("a.b.c"), Err(TokenError::InvalidSignature));
        assert_eq!(codec.verify(""), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_token_signed_with_other_key_rejected() {
        let codec = test_codec();
        let other = TokenCodec::new(Arc::new(ConfigSecretProvider::from_key(
            "another_secret_key_32_characters_ok!",
        )))
        .unwrap();

        let token = other.sign(&Uuid::new_v4(), Duration::seconds(900)).unwrap();
        assert_eq!(codec.verify(&token), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_short_secret_rejected() {
        let provider = Arc::new(ConfigSecretProvider::from_key("short"));
        assert!(TokenCodec::new(provider).is_err());
    }

    #[test]
    fn test_different_tokens_for_same_user() {
        let codec = test_codec();
        let user_id = Uuid::new_v4();

        let token1 = codec.sign(&user_id, Duration::seconds(900)).unwrap();
        let token2 = codec.sign(&user_id, Duration::seconds(900)).unwrap();

        // jti 不同，令牌必然不同
        assert_ne!(token1, token2);
    }
}
