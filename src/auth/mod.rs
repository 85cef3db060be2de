//! Authentication module

pub mod cookie;
pub mod exchange;
pub mod jwt;
pub mod middleware;
pub mod secrets;

pub use cookie::{ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME};
pub use exchange::{DevIdentityExchanger, ExternalIdentity, IdentityExchanger};
pub use jwt::{Claims, TokenCodec, TokenError};
pub use middleware::{auth_gate, resolve_user_id, RequestIdentity};
pub use secrets::{ConfigSecretProvider, SecretProvider};
