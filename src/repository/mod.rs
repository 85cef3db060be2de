//! 数据访问层

pub mod refresh_repo;
pub mod user_repo;

pub use refresh_repo::{
    MemoryRefreshTokenStore, PgRefreshTokenStore, RefreshStoreError, RefreshTokenStore,
};
pub use user_repo::{MemoryUserDirectory, PgUserDirectory, UserDirectory};
