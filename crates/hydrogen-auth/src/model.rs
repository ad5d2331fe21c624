//! Data model for accounts, JWT claims, and the login-attempt/IP-list
//! enums used by rate limiting.

use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// `accounts.status_bits`: enabled/authorized are tracked as explicit
    /// bits rather than booleans so future flags fit without a schema
    /// change.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusBits: u32 {
        const ENABLED = 0b0000_0001;
        const AUTHORIZED = 0b0000_0010;
    }
}

#[derive(Debug, Clone)]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub password_hash: String,
    pub status: StatusBits,
    pub email: Option<String>,
    pub roles: Vec<String>,
}

impl Account {
    pub fn is_usable(&self) -> bool {
        self.status.contains(StatusBits::ENABLED) && self.status.contains(StatusBits::AUTHORIZED)
    }
}

/// JWT claims carried in every issued token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub jti: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub user_id: i64,
    pub system_id: String,
    pub app_id: String,
    pub username: String,
    pub email: Option<String>,
    pub roles: Vec<String>,
    pub ip: Option<String>,
    pub tz: Option<String>,
    pub database: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpListKind {
    Whitelist,
    Blacklist,
    Tempblock,
}

impl IpListKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Whitelist => "whitelist",
            Self::Blacklist => "blacklist",
            Self::Tempblock => "tempblock",
        }
    }
}
