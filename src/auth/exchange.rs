//! 外部身份交换
//! 授权码换取身份声明的调用对本服务是黑盒，这里只定义窄接口

use crate::error::AppError;
use async_trait::async_trait;

/// 身份提供方返回的身份声明
#[derive(Debug, Clone)]
pub struct ExternalIdentity {
    pub provider: String,
    pub subject: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

/// 授权码交换接口。提供方集成（OAuth 等）在部署侧接入，
/// 本 crate 不关心其线上格式。
#[async_trait]
pub trait IdentityExchanger: Send + Sync {
    /// 登录入口 URL（客户端跳转用）
    fn login_url(&self) -> String;

    /// 用授权码换取身份声明
    async fn exchange_code(&self, code: &str) -> Result<ExternalIdentity, AppError>;
}

/// 开发模式交换器：任意非空授权码换取固定身份。
/// 仅在 `security.dev_login` 打开时装配。
pub struct DevIdentityExchanger {
    subject: String,
}

impl DevIdentityExchanger {
    pub fn new(subject: &str) -> Self {
        Self { subject: subject.to_string() }
    }
}

#[async_trait]
impl IdentityExchanger for DevIdentityExchanger {
    fn login_url(&self) -> String {
        "/api/v1/auth/login".to_string()
    }

    async fn exchange_code(&self, code: &str) -> Result<ExternalIdentity, AppError> {
        if code.is_empty() {
            return Err(AppError::bad_request("Authorization code must not be empty"));
        }

        tracing::warn!(subject = %self.subject, "Dev login exchange used, do not enable in production");

        Ok(ExternalIdentity {
            provider: "dev".to_string(),
            subject: self.subject.clone(),
            email: None,
            display_name: None,
        })
    }
}
