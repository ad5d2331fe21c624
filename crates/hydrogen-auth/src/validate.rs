//! Input validation for `register`/`login`.

use once_cell::sync::Lazy;
use regex::Regex;

static USERNAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{3,50}$").unwrap());

pub fn is_valid_username(name: &str) -> bool {
    USERNAME_RE.is_match(name)
}

pub fn is_valid_password(password: &str) -> bool {
    (8..=128).contains(&password.len())
}

/// Intentionally permissive: only checks for an `@` followed somewhere
/// later by a `.`. Accepts `user@@example.com` and a trailing dot — kept
/// as specified, not "fixed" (open questions 2 and 3).
pub fn is_valid_email(email: &str) -> bool {
    match email.find('@') {
        Some(at) => email[at + 1..].contains('.'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_accepts_alnum_underscore_dash_in_range() {
        assert!(is_valid_username("alice_01"));
        assert!(is_valid_username("a-b"));
        assert!(!is_valid_username("ab"));
        assert!(!is_valid_username(&"a".repeat(51)));
        assert!(!is_valid_username("bad space"));
    }

    #[test]
    fn password_length_bounds() {
        assert!(!is_valid_password("short"));
        assert!(is_valid_password(&"a".repeat(8)));
        assert!(is_valid_password(&"a".repeat(128)));
        assert!(!is_valid_password(&"a".repeat(129)));
    }

    #[test]
    fn email_validator_is_permissive_by_design() {
        assert!(is_valid_email("user@example.com"));
        assert!(is_valid_email("user@@example.com"));
        assert!(is_valid_email("user@example.com."));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("user@nodot"));
    }
}
