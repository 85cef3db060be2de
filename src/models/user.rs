//! 用户模型
//! 用户的增删改由外部协作方负责，网关只读

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// 用户状态常量
pub const USER_STATUS_ACTIVE: &str = "active";
pub const USER_STATUS_DISABLED: &str = "disabled";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    /// 外部身份提供方标识（如 "google"、"dev"）
    pub external_provider: String,
    /// 提供方侧的用户标识
    pub external_subject: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status == USER_STATUS_ACTIVE
    }
}

/// 对外返回的用户信息（不含内部字段）
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            display_name: user.display_name,
        }
    }
}
