//! 会话相关的请求/响应 DTO

use serde::{Deserialize, Serialize};

/// 登录请求：身份提供方回调携带的授权码
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub code: String,
}

/// 登录入口响应
#[derive(Debug, Serialize)]
pub struct LoginUrlResponse {
    pub login_url: String,
}

/// 登出响应
#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub message: String,
}
