//! 数据模型定义

pub mod session;
pub mod user;
