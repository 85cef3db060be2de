//! 多租户任务跟踪后端
//! 核心为请求认证与准入控制网关：令牌签发/校验、刷新令牌轮换、分布式限流

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod ratelimit;
pub mod repository;
pub mod routes;
pub mod services;
pub mod telemetry;
