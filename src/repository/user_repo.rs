//! 用户目录
//! 网关对用户数据只有两种查询：按 id、按外部身份

use crate::{error::AppError, models::user::User};
use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::PgPool;
use uuid::Uuid;

/// 用户查询接口。用户的创建/管理属于外部协作方，这里不提供写入。
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError>;

    async fn find_by_external_identity(
        &self,
        provider: &str,
        subject: &str,
    ) -> Result<Option<User>, AppError>;
}

// ==================== PostgreSQL 实现 ====================

pub struct PgUserDirectory {
    db: PgPool,
}

impl PgUserDirectory {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        Ok(user)
    }

    async fn find_by_external_identity(
        &self,
        provider: &str,
        subject: &str,
    ) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE external_provider = $1 AND external_subject = $2",
        )
        .bind(provider)
        .bind(subject)
        .fetch_optional(&self.db)
        .await?;

        Ok(user)
    }
}

// ==================== 内存实现（测试与单机开发） ====================

#[derive(Default)]
pub struct MemoryUserDirectory {
    users: DashMap<Uuid, User>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: User) {
        self.users.insert(user.id, user);
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn find_by_external_identity(
        &self,
        provider: &str,
        subject: &str,
    ) -> Result<Option<User>, AppError> {
        Ok(self
            .users
            .iter()
            .find(|u| u.external_provider == provider && u.external_subject == subject)
            .map(|u| u.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::USER_STATUS_ACTIVE;
    use chrono::Utc;

    fn test_user() -> User {
        User {
            id: Uuid::new_v4(),
            external_provider: "dev".to_string(),
            external_subject: "alice".to_string(),
            email: Some("alice@example.com".to_string()),
            display_name: Some("Alice".to_string()),
            status: USER_STATUS_ACTIVE.to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_memory_directory_lookups() {
        let directory = MemoryUserDirectory::new();
        let user = test_user();
        let id = user.id;
        directory.insert(user);

        assert!(directory.find_by_id(id).await.unwrap().is_some());
        assert!(directory.find_by_id(Uuid::new_v4()).await.unwrap().is_none());

        let found = directory
            .find_by_external_identity("dev", "alice")
            .await
            .unwrap();
        assert_eq!(found.unwrap().id, id);

        assert!(directory
            .find_by_external_identity("dev", "bob")
            .await
            .unwrap()
            .is_none());
    }
}
