//! Auth: JWT-based login/register/renew/logout, rate limiting and
//! revocation, persisted through a [`hydrogen_dqm::DatabaseQueueManager`].

mod jwt;
mod model;
mod ratelimit;
mod service;
mod store;
mod validate;

pub use jwt::peek_database;
pub use model::{Account, IpListKind, JwtClaims, LoginOutcome, StatusBits};
pub use ratelimit::RateLimitConfig;
pub use service::{AuthConfig, AuthService, LoginResponse, RenewResponse};
pub use validate::{is_valid_email, is_valid_password, is_valid_username};
