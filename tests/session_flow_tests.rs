//! 会话全流程集成测试
//! 登录、滑动续签、过期刷新、复用拒绝

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use std::sync::Arc;
use taskhub::auth::{
    jwt::TokenCodec, secrets::ConfigSecretProvider, ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME,
};
use tower::ServiceExt;

mod common;
use common::{create_test_app, create_test_config, extract_cookie, seed_dev_user};

fn login_request() -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"code":"dev-code"}"#))
        .unwrap()
}

fn me_request(cookies: &str) -> Request<Body> {
    Request::builder()
        .uri("/api/v1/auth/me")
        .header(header::COOKIE, cookies)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_login_issues_both_cookies() {
    let app = create_test_app(create_test_config());
    let user_id = seed_dev_user(&app.users);
    let router = taskhub::routes::create_router(app.state.clone());

    let response = router.oneshot(login_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let jwt = extract_cookie(&response, ACCESS_COOKIE_NAME).expect("access cookie");
    let refresh = extract_cookie(&response, REFRESH_COOKIE_NAME).expect("refresh cookie");
    assert!(!jwt.is_empty());
    // 刷新 Cookie 是 "记录id:code" 结构
    assert!(refresh.contains(':'));

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["id"], user_id.to_string());
}

#[tokio::test]
async fn test_login_without_local_user_rejected() {
    let app = create_test_app(create_test_config());
    let router = taskhub::routes::create_router(app.state.clone());

    let response = router.oneshot(login_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_me_with_valid_access_cookie() {
    let app = create_test_app(create_test_config());
    let user_id = seed_dev_user(&app.users);
    let router = taskhub::routes::create_router(app.state.clone());

    let login = router.clone().oneshot(login_request()).await.unwrap();
    let jwt = extract_cookie(&login, ACCESS_COOKIE_NAME).unwrap();

    let response = router
        .oneshot(me_request(&format!("{}={}", ACCESS_COOKIE_NAME, jwt)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // 滑动续签：成功认证也会重发访问令牌
    assert!(extract_cookie(&response, ACCESS_COOKIE_NAME).is_some());

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["id"], user_id.to_string());
}

#[tokio::test]
async fn test_me_without_credentials_rejected() {
    let app = create_test_app(create_test_config());
    seed_dev_user(&app.users);
    let router = taskhub::routes::create_router(app.state.clone());

    let response = router
        .oneshot(
            Request::builder()
                .uri("/api/v1/auth/me")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_expired_access_token_recovered_via_refresh() {
    let app = create_test_app(create_test_config());
    let user_id = seed_dev_user(&app.users);
    let router = taskhub::routes::create_router(app.state.clone());

    let login = router.clone().oneshot(login_request()).await.unwrap();
    let refresh = extract_cookie(&login, REFRESH_COOKIE_NAME).unwrap();

    // 构造已过期的访问令牌
    let codec = TokenCodec::new(Arc::new(ConfigSecretProvider::from_key(
        common::TEST_JWT_SECRET,
    )))
    .unwrap();
    let expired = codec
        .sign_at(&user_id, Duration::seconds(20), Utc::now() - Duration::seconds(120))
        .unwrap();

    let cookies = format!(
        "{}={}; {}={}",
        ACCESS_COOKIE_NAME, expired, REFRESH_COOKIE_NAME, refresh
    );
    let response = router.oneshot(me_request(&cookies)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    // 刷新成功要重发两个 Cookie，且刷新 code 已轮换
    let new_jwt = extract_cookie(&response, ACCESS_COOKIE_NAME).expect("new access cookie");
    let new_refresh = extract_cookie(&response, REFRESH_COOKIE_NAME).expect("new refresh cookie");
    assert_ne!(new_jwt, expired);
    assert_ne!(new_refresh, refresh);
}

#[tokio::test]
async fn test_replayed_refresh_cookie_rejected() {
    let app = create_test_app(create_test_config());
    seed_dev_user(&app.users);
    let router = taskhub::routes::create_router(app.state.clone());

    let login = router.clone().oneshot(login_request()).await.unwrap();
    let original_refresh = extract_cookie(&login, REFRESH_COOKIE_NAME).unwrap();

    let cookies = format!("{}={}", REFRESH_COOKIE_NAME, original_refresh);

    // 第一次刷新成功
    let first = router.clone().oneshot(me_request(&cookies)).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    // 重放旧的刷新 Cookie 必须被拒绝，且对外与普通认证失败一致
    let replay = router.oneshot(me_request(&cookies)).await.unwrap();
    assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);

    let bytes = replay.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["error"]["message"], "Authentication failed");
}

#[tokio::test]
async fn test_logout_clears_cookies_and_revokes_refresh() {
    let app = create_test_app(create_test_config());
    seed_dev_user(&app.users);
    let router = taskhub::routes::create_router(app.state.clone());

    let login = router.clone().oneshot(login_request()).await.unwrap();
    let jwt = extract_cookie(&login, ACCESS_COOKIE_NAME).unwrap();
    let refresh = extract_cookie(&login, REFRESH_COOKIE_NAME).unwrap();

    let cookies = format!(
        "{}={}; {}={}",
        ACCESS_COOKIE_NAME, jwt, REFRESH_COOKIE_NAME, refresh
    );
    let logout = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/auth/logout")
                .header(header::COOKIE, cookies)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(logout.status(), StatusCode::OK);

    // 清除 Cookie 的 Max-Age 为 0
    let clearing: Vec<_> = logout
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter(|v| v.contains("Max-Age=0"))
        .collect();
    assert_eq!(clearing.len(), 2);

    // 刷新记录已销毁，单独用刷新 Cookie 不能再恢复会话
    let cookies = format!("{}={}", REFRESH_COOKIE_NAME, refresh);
    let after = router.oneshot(me_request(&cookies)).await.unwrap();
    assert_eq!(after.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_oversized_request_body_rejected() {
    let app = create_test_app(create_test_config());
    seed_dev_user(&app.users);
    let router = taskhub::routes::create_router(app.state.clone());

    // 16 KiB 之外的请求体直接 413
    let padding = "x".repeat(32 * 1024);
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(format!(r#"{{"code":"{}"}}"#, padding)))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_public_routes_skip_authentication() {
    let app = create_test_app(create_test_config());
    let router = taskhub::routes::create_router(app.state.clone());

    // 无凭证访问公开端点
    let health = router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);

    let login_url = router
        .oneshot(
            Request::builder()
                .uri("/api/v1/auth/login-url")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(login_url.status(), StatusCode::OK);
}
