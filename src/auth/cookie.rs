//! 认证 Cookie 的解析与构造

use axum::http::header;
use uuid::Uuid;

/// 短期访问令牌的 Cookie 名
pub const ACCESS_COOKIE_NAME: &str = "jwt";

/// 刷新凭证的 Cookie 名，值为 `"<recordId>:<secretCode>"`
pub const REFRESH_COOKIE_NAME: &str = "RefreshKey";

/// 从 Cookie 请求头提取指定名称的值
pub fn get_cookie<'a>(headers: &'a axum::http::HeaderMap, name: &str) -> Option<&'a str> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    for part in cookie_header.split(';') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            if key.trim() == name {
                return Some(value.trim());
            }
        }
    }
    None
}

/// 构造带安全属性的 Set-Cookie 值
pub fn build_cookie(name: &str, value: &str, max_age_secs: u64) -> String {
    format!(
        "{}={}; HttpOnly; Secure; SameSite=Strict; Path=/; Max-Age={}",
        name, value, max_age_secs
    )
}

/// 构造清除 Cookie 用的 Set-Cookie 值
pub fn clear_cookie(name: &str) -> String {
    format!(
        "{}=; HttpOnly; Secure; SameSite=Strict; Path=/; Max-Age=0",
        name
    )
}

/// 组装刷新 Cookie 的载荷
pub fn format_refresh_value(record_id: Uuid, code: &str) -> String {
    format!("{}:{}", record_id, code)
}

/// 解析刷新 Cookie 载荷为 `(recordId, secretCode)`。
/// 任何结构缺陷都返回 `None`，调用方按完整性违规处理，不是软错误。
pub fn parse_refresh_value(value: &str) -> Option<(Uuid, &str)> {
    let (id, code) = value.split_once(':')?;
    if code.is_empty() {
        return None;
    }
    let record_id = Uuid::parse_str(id).ok()?;
    Some((record_id, code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_get_cookie_simple() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("jwt=abc123"));

        assert_eq!(get_cookie(&headers, "jwt"), Some("abc123"));
    }

    #[test]
    fn test_get_cookie_multiple() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("foo=bar; jwt=abc123; RefreshKey=xyz789"),
        );

        assert_eq!(get_cookie(&headers, "jwt"), Some("abc123"));
        assert_eq!(get_cookie(&headers, "RefreshKey"), Some("xyz789"));
        assert_eq!(get_cookie(&headers, "foo"), Some("bar"));
    }

    #[test]
    fn test_get_cookie_not_found() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("foo=bar"));

        assert_eq!(get_cookie(&headers, "jwt"), None);
    }

    #[test]
    fn test_get_cookie_with_spaces() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("  jwt = abc123  ; foo=bar"),
        );

        assert_eq!(get_cookie(&headers, "jwt"), Some("abc123"));
    }

    #[test]
    fn test_build_cookie_attributes() {
        let cookie = build_cookie(ACCESS_COOKIE_NAME, "tok", 900);
        assert!(cookie.starts_with("jwt=tok;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Secure"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(cookie.contains("Path=/"));
        assert!(cookie.contains("Max-Age=900"));
    }

    #[test]
    fn test_clear_cookie_zeroes_max_age() {
        let cookie = clear_cookie(REFRESH_COOKIE_NAME);
        assert!(cookie.starts_with("RefreshKey=;"));
        assert!(cookie.contains("Max-Age=0"));
    }

    #[test]
    fn test_refresh_value_roundtrip() {
        let id = Uuid::new_v4();
        let value = format_refresh_value(id, "secret-code");

        let (parsed_id, parsed_code) = parse_refresh_value(&value).unwrap();
        assert_eq!(parsed_id, id);
        assert_eq!(parsed_code, "secret-code");
    }

    #[test]
    fn test_parse_refresh_value_malformed() {
        assert!(parse_refresh_value("no-separator").is_none());
        assert!(parse_refresh_value("not-a-uuid:code").is_none());
        assert!(parse_refresh_value(&format!("{}:", Uuid::new_v4())).is_none());
        assert!(parse_refresh_value("").is_none());
    }

    #[test]
    fn test_parse_refresh_value_code_with_colon() {
        // 只按第一个冒号切分，随机码里出现冒号也要能解析
        let id = Uuid::new_v4();
        let value = format!("{}:ab:cd", id);
        let (_, code) = parse_refresh_value(&value).unwrap();
        assert_eq!(code, "ab:cd");
    }
}
