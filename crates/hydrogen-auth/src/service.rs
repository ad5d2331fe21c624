//! `AuthService`: the public login/register/renew/logout surface.
//!
//! Shaped after the teacher pack's `AuthService` (config + pool + keying
//! material, `#[tracing::instrument]` on the hot path) but persists
//! through a [`DatabaseQueueManager`] instead of a bare pool, and signs
//! its own JWTs rather than delegating to a JWT crate.

use std::sync::Arc;

use chrono::Utc;

use hydrogen_dqm::DatabaseQueueManager;
use hydrogen_errors::Error;

use crate::jwt;
use crate::model::{JwtClaims, LoginOutcome, StatusBits};
use crate::ratelimit::{self, RateLimitConfig};
use crate::store;
use crate::validate;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub hmac_secret: Vec<u8>,
    pub jwt_lifetime_seconds: i64,
    pub rate_limit: RateLimitConfig,
    pub iss: String,
    pub aud: String,
    pub system_id: String,
    pub app_id: String,
}

impl AuthConfig {
    pub fn new(hmac_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            hmac_secret: hmac_secret.into(),
            jwt_lifetime_seconds: 3600,
            rate_limit: RateLimitConfig::default(),
            iss: "hydrogen".to_string(),
            aud: "hydrogen-clients".to_string(),
            system_id: "hydrogen".to_string(),
            app_id: "hydrogen".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: i64,
    pub user_id: i64,
    pub username: String,
    pub email: Option<String>,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RenewResponse {
    pub token: String,
    pub expires_at: i64,
}

pub struct AuthService {
    dqm: Arc<DatabaseQueueManager>,
    config: AuthConfig,
}

impl AuthService {
    pub fn new(dqm: Arc<DatabaseQueueManager>, config: AuthConfig) -> Self {
        Self { dqm, config }
    }

    /// Creates the auth tables if they don't already exist. Call once at
    /// startup, after the database's DQM is registered.
    pub async fn bootstrap(&self) -> Result<(), Error> {
        store::ensure_schema(&self.dqm).await
    }

    /// Unknown-account and bad-password both surface as a generic
    /// `Unauthorized` — the wire layer renders this as `"Invalid
    /// credentials"` for both, never distinguishing the two (no account
    /// enumeration).
    #[tracing::instrument(skip(self, password, api_key), fields(login_id))]
    pub async fn login(
        &self,
        login_id: &str,
        password: &str,
        api_key: &str,
        timezone: Option<&str>,
        database: &str,
        client_ip: &str,
    ) -> Result<LoginResponse, Error> {
        if login_id.trim().is_empty() || password.is_empty() {
            return Err(Error::invalid_input("login_id and password are required"));
        }

        let now = Utc::now().timestamp();
        store::revocation_gc(&self.dqm, now).await?;

        if !store::valid_api_key(&self.dqm, api_key, now).await? {
            return Err(Error::forbidden("invalid or expired api key"));
        }

        ratelimit::check(&self.dqm, &self.config.rate_limit, login_id, client_ip, now).await?;

        let account = store::find_account_by_login(&self.dqm, login_id).await?;

        let outcome = match &account {
            Some(acc) if acc.is_usable() => {
                let expected = hydrogen_crypto::hash_password(acc.id, password);
                if hydrogen_crypto::constant_time_eq(expected.as_bytes(), acc.password_hash.as_bytes()) {
                    LoginOutcome::Success
                } else {
                    LoginOutcome::Failure
                }
            }
            _ => LoginOutcome::Failure,
        };

        store::record_attempt(&self.dqm, login_id, client_ip, now, outcome).await?;

        if outcome == LoginOutcome::Failure {
            return Err(Error::unauthorized());
        }
        let account = account.expect("Success outcome only reached with Some(account)");

        let email = store::contact_email(&self.dqm, account.id).await?;
        let exp = now + self.config.jwt_lifetime_seconds;
        let claims = JwtClaims {
            iss: self.config.iss.clone(),
            sub: account.id.to_string(),
            aud: self.config.aud.clone(),
            jti: hydrogen_crypto::generate_jti()?,
            iat: now,
            nbf: now,
            exp,
            user_id: account.id,
            system_id: self.config.system_id.clone(),
            app_id: self.config.app_id.clone(),
            username: account.name.clone(),
            email: email.clone(),
            roles: account.roles.clone(),
            ip: Some(client_ip.to_string()),
            tz: timezone.map(str::to_string),
            database: database.to_string(),
        };

        let token = jwt::encode(&claims, &self.config.hmac_secret)?;
        let token_hash = hydrogen_crypto::hash_token(&token);
        store::store_token(&self.dqm, account.id, &token_hash, exp).await?;

        Ok(LoginResponse {
            token: format!("Bearer {token}"),
            expires_at: exp,
            user_id: account.id,
            username: account.name,
            email,
            roles: claims.roles,
        })
    }

    /// Creates a new account.
    #[tracing::instrument(skip(self, password, api_key))]
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        email: &str,
        full_name: Option<&str>,
        api_key: &str,
        _database: &str,
    ) -> Result<i64, Error> {
        if !validate::is_valid_username(username) {
            return Err(Error::invalid_input("username must be 3-50 alphanumeric/_/- characters"));
        }
        if !validate::is_valid_password(password) {
            return Err(Error::invalid_input("password must be 8-128 characters"));
        }
        if !validate::is_valid_email(email) {
            return Err(Error::invalid_input("invalid email"));
        }

        let now = Utc::now().timestamp();
        if !store::valid_api_key(&self.dqm, api_key, now).await? {
            return Err(Error::forbidden("invalid or expired api key"));
        }

        if store::name_taken(&self.dqm, username).await? || store::contact_taken(&self.dqm, email).await? {
            return Err(Error::conflict("username or email already registered"));
        }

        let id = store::next_account_id(&self.dqm).await?;
        let hash = hydrogen_crypto::hash_password(id, password);
        store::insert_account(&self.dqm, id, username, &hash, StatusBits::ENABLED | StatusBits::AUTHORIZED).await?;
        store::insert_contact(&self.dqm, id, "email", email).await?;
        if let Some(name) = full_name {
            store::insert_contact(&self.dqm, id, "full_name", name).await?;
        }
        Ok(id)
    }

    /// Validates `token`, issues a fresh JWT with new `iat`/`exp`, and
    /// swaps its stored hash for the new one. Database is
    /// taken from the JWT claims when `database_override` is absent.
    #[tracing::instrument(skip(self, token))]
    pub async fn renew(&self, token: &str, database_override: Option<&str>) -> Result<RenewResponse, Error> {
        let claims = jwt::decode_verified(token, &self.config.hmac_secret)?;
        let now = Utc::now().timestamp();
        if !jwt::is_time_valid(&claims, now) {
            return Err(Error::unauthorized());
        }

        let old_hash = hydrogen_crypto::hash_token(token);
        if !store::token_is_active(&self.dqm, &old_hash, now).await? {
            return Err(Error::unauthorized());
        }

        let database = database_override.map(str::to_string).unwrap_or_else(|| claims.database.clone());
        let new_exp = now + self.config.jwt_lifetime_seconds;
        let new_jti = hydrogen_crypto::generate_jti()?;
        let new_claims = JwtClaims { iat: now, nbf: now, exp: new_exp, jti: new_jti, database, ..claims };
        let new_token = jwt::encode(&new_claims, &self.config.hmac_secret)?;
        let new_hash = hydrogen_crypto::hash_token(&new_token);

        // Not a single atomic transaction across the two DQM submits (see
        // `DESIGN.md`); acceptable since a crash between them only ever
        // leaves a stale-but-still-valid token rather than locking a user
        // out entirely.
        store::delete_token(&self.dqm, &old_hash).await?;
        store::store_token(&self.dqm, new_claims.user_id, &new_hash, new_exp).await?;

        Ok(RenewResponse { token: format!("Bearer {new_token}"), expires_at: new_exp })
    }

    /// Revokes `token`. Accepts already-expired tokens: a session must be
    /// closeable even after it has lapsed.
    #[tracing::instrument(skip(self, token))]
    pub async fn logout(&self, token: &str) -> Result<(), Error> {
        let _claims = jwt::decode_verified(token, &self.config.hmac_secret)?;
        let now = Utc::now().timestamp();
        let hash = hydrogen_crypto::hash_token(token);
        store::delete_token(&self.dqm, &hash).await?;
        store::revocation_gc(&self.dqm, now).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use hydrogen_connectors::mock::{MockAdapter, MockDatabase};
    use hydrogen_connectors::EngineAdapter;
    use hydrogen_dqm::SpawnPolicy;
    use hydrogen_pool::Pool;
    use hydrogen_qtc::Qtc;

    use super::*;

    async fn service() -> AuthService {
        let db = Arc::new(MockDatabase::default());
        let adapter: Arc<dyn EngineAdapter> = Arc::new(MockAdapter::new(db));
        let pool = Arc::new(Pool::new("auth-test", adapter, 4, StdDuration::from_secs(30)));
        let dqm = Arc::new(DatabaseQueueManager::new("auth-test", pool, Arc::new(Qtc::new()), SpawnPolicy::default()));
        let svc = AuthService::new(dqm, AuthConfig::new(b"test-secret".to_vec()));
        svc.bootstrap().await.unwrap();

        let now = Utc::now().timestamp();
        store::insert_account(
            &svc.dqm,
            1,
            "alice",
            &hydrogen_crypto::hash_password(1, "correct horse"),
            StatusBits::ENABLED | StatusBits::AUTHORIZED,
        )
        .await
        .unwrap();
        store::insert_contact(&svc.dqm, 1, "email", "alice@example.com").await.unwrap();
        let mut params = hydrogen_connectors::ParamBindings::new();
        params.insert("key", hydrogen_connectors::TypedParam::String("demo-key".into()));
        params.insert("now", hydrogen_connectors::TypedParam::Integer(now));
        svc.dqm
            .run(
                hydrogen_dqm::QueryRequest::new(
                    "INSERT INTO api_keys (key_text, system_id, app_id, valid_until) VALUES (:key, 'sys', 'app', NULL)",
                    params,
                ),
                StdDuration::from_secs(2),
            )
            .await
            .unwrap()
            .outcome
            .unwrap();
        svc
    }

    #[tokio::test]
    async fn login_succeeds_with_correct_password() {
        let svc = service().await;
        let result = svc.login("alice", "correct horse", "demo-key", None, "hydrogen", "10.0.0.1").await.unwrap();
        assert_eq!(result.username, "alice");
        assert!(result.token.starts_with("Bearer "));
    }

    #[tokio::test]
    async fn login_fails_with_wrong_password() {
        let svc = service().await;
        let err = svc.login("alice", "wrong password", "demo-key", None, "hydrogen", "10.0.0.1").await.unwrap_err();
        assert!(matches!(err.kind(), hydrogen_errors::ErrorKind::Unauthorized));
    }

    #[tokio::test]
    async fn login_fails_for_unknown_account_with_same_error_as_bad_password() {
        let svc = service().await;
        let err = svc.login("ghost", "whatever1", "demo-key", None, "hydrogen", "10.0.0.1").await.unwrap_err();
        assert!(matches!(err.kind(), hydrogen_errors::ErrorKind::Unauthorized));
    }

    #[tokio::test]
    async fn sixth_failed_attempt_is_rate_limited() {
        let svc = service().await;
        for _ in 0..5 {
            let err = svc.login("alice", "wrong", "demo-key", None, "hydrogen", "10.1.1.1").await.unwrap_err();
            assert!(matches!(err.kind(), hydrogen_errors::ErrorKind::Unauthorized));
        }
        let err = svc.login("alice", "wrong", "demo-key", None, "hydrogen", "10.1.1.1").await.unwrap_err();
        assert_eq!(err.retry_after_secs(), Some(900));

        // Seventh call short-circuits on the tempblock row alone.
        let err = svc.login("alice", "correct horse", "demo-key", None, "hydrogen", "10.1.1.1").await.unwrap_err();
        assert_eq!(err.retry_after_secs(), Some(900));
    }

    #[tokio::test]
    async fn register_then_login_round_trips() {
        let svc = service().await;
        svc.register("carol", "a-strong-password", "carol@example.com", None, "demo-key", "hydrogen").await.unwrap();
        let result = svc.login("carol", "a-strong-password", "demo-key", None, "hydrogen", "10.0.0.2").await.unwrap();
        assert_eq!(result.username, "carol");
    }

    #[tokio::test]
    async fn register_rejects_duplicate_username() {
        let svc = service().await;
        let err = svc.register("alice", "a-strong-password", "new@example.com", None, "demo-key", "hydrogen").await.unwrap_err();
        assert!(matches!(err.kind(), hydrogen_errors::ErrorKind::Conflict(_)));
    }

    #[tokio::test]
    async fn renew_issues_a_new_token_and_invalidates_the_old_one() {
        let svc = service().await;
        let login = svc.login("alice", "correct horse", "demo-key", None, "hydrogen", "10.0.0.1").await.unwrap();
        let bare = login.token.trim_start_matches("Bearer ");

        let renewed = svc.renew(bare, None).await.unwrap();
        assert_ne!(renewed.token, login.token);

        let err = svc.renew(bare, None).await.unwrap_err();
        assert!(matches!(err.kind(), hydrogen_errors::ErrorKind::Unauthorized));
    }

    #[tokio::test]
    async fn logout_accepts_an_expired_token() {
        let svc = service().await;
        let mut claims = JwtClaims {
            iss: "hydrogen".into(),
            sub: "1".into(),
            aud: "hydrogen-clients".into(),
            jti: "x".into(),
            iat: 0,
            nbf: 0,
            exp: 1,
            user_id: 1,
            system_id: "hydrogen".into(),
            app_id: "hydrogen".into(),
            username: "alice".into(),
            email: None,
            roles: vec![],
            ip: None,
            tz: None,
            database: "hydrogen".into(),
        };
        claims.exp = 1; // already expired
        let expired_token = jwt::encode(&claims, &svc.config.hmac_secret).unwrap();

        svc.logout(&expired_token).await.unwrap();
    }
}
