//! Hand-rolled JWT encode/verify.
//!
//! Not built on the `jsonwebtoken` crate: the header's field order
//! (`alg` before `typ`) and the exact claim set must be bit-exact, and
//! signing reuses `hydrogen_crypto`'s HMAC-SHA-256 directly rather than
//! a JWT-specific abstraction.

use serde::{Deserialize, Serialize};

use hydrogen_crypto::{base64url_decode, base64url_encode, hmac_sha256_verify, hmac_sha256};
use hydrogen_errors::Error;

use crate::model::JwtClaims;

/// Field order matters: this must serialize as `{"alg":"HS256","typ":"JWT"}`.
#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

impl Default for Header {
    fn default() -> Self {
        Self { alg: "HS256".to_string(), typ: "JWT".to_string() }
    }
}

/// Signs `claims` and returns the three-segment `header.payload.signature`
/// token, each segment base64url (no padding).
pub fn encode(claims: &JwtClaims, secret: &[u8]) -> Result<String, Error> {
    let header_json = serde_json::to_string(&Header::default())
        .map_err(|e| Error::internal(format!("jwt header encode: {e}")))?;
    let payload_json = serde_json::to_string(claims)
        .map_err(|e| Error::internal(format!("jwt payload encode: {e}")))?;

    let signing_input = format!(
        "{}.{}",
        base64url_encode(header_json.as_bytes()),
        base64url_encode(payload_json.as_bytes())
    );
    let signature = hmac_sha256(secret, signing_input.as_bytes());
    Ok(format!("{signing_input}.{}", base64url_encode(&signature)))
}

/// Verifies the signature and decodes the claims, without checking
/// `nbf`/`exp` or revocation — callers layer those on top (signature
/// validity and time validity are treated as distinct
/// transitions).
pub fn decode_verified(token: &str, secret: &[u8]) -> Result<JwtClaims, Error> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(sig_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::unauthorized());
    };

    let signing_input = format!("{header_b64}.{payload_b64}");
    let signature = base64url_decode(sig_b64).map_err(|_| Error::unauthorized())?;
    if !hmac_sha256_verify(secret, signing_input.as_bytes(), &signature) {
        return Err(Error::unauthorized());
    }

    let payload_bytes = base64url_decode(payload_b64).map_err(|_| Error::unauthorized())?;
    serde_json::from_slice(&payload_bytes).map_err(|_| Error::unauthorized())
}

/// Whether `claims` is within its validity window at `now` (unix seconds).
pub fn is_time_valid(claims: &JwtClaims, now: i64) -> bool {
    claims.nbf <= now && now < claims.exp
}

/// Reads the `database` claim out of a verified token, for routing a
/// `renew`/`logout` call to the right database's `AuthService` when the
/// request body omits `database` (taken from JWT claims when absent).
pub fn peek_database(token: &str, secret: &[u8]) -> Result<String, Error> {
    decode_verified(token, secret).map(|c| c.database)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JwtClaims;

    fn claims() -> JwtClaims {
        JwtClaims {
            iss: "hydrogen".into(),
            sub: "1".into(),
            aud: "hydrogen-clients".into(),
            jti: "abc123".into(),
            iat: 0,
            nbf: 0,
            exp: 9_999_999_999,
            user_id: 1,
            system_id: "sys".into(),
            app_id: "app".into(),
            username: "alice".into(),
            email: None,
            roles: vec!["admin".into()],
            ip: None,
            tz: None,
            database: "Acuranzo".into(),
        }
    }

    #[test]
    fn header_field_order_is_alg_then_typ() {
        let json = serde_json::to_string(&Header::default()).unwrap();
        assert_eq!(json, r#"{"alg":"HS256","typ":"JWT"}"#);
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let c = claims();
        let token = encode(&c, b"k").unwrap();
        let decoded = decode_verified(&token, b"k").unwrap();
        assert_eq!(decoded.database, "Acuranzo");
        assert_eq!(decoded.sub, "1");
    }

    #[test]
    fn rejects_token_signed_with_a_different_secret() {
        let token = encode(&claims(), b"k").unwrap();
        assert!(decode_verified(&token, b"different").is_err());
    }

    #[test]
    fn rejects_malformed_token_shape() {
        assert!(decode_verified("not.a.jwt.token", b"k").is_err());
        assert!(decode_verified("onlyonepart", b"k").is_err());
    }

    #[test]
    fn peek_database_reads_the_claim_without_a_dqm() {
        let token = encode(&claims(), b"k").unwrap();
        assert_eq!(peek_database(&token, b"k").unwrap(), "Acuranzo");
    }

    #[test]
    fn time_validity_respects_nbf_and_exp() {
        let mut c = claims();
        c.nbf = 100;
        c.exp = 200;
        assert!(!is_time_valid(&c, 50));
        assert!(is_time_valid(&c, 150));
        assert!(!is_time_valid(&c, 200));
    }
}
