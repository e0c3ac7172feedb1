//! Session tokens, password hashing, and the session cookie.
//!
//! A session token is a two-part string: a base64url JSON payload carrying
//! the user id and expiry, and a keyed BLAKE3 tag over the payload bytes.
//! The signing key is derived from the server secret, so tokens survive a
//! restart as long as the secret is stable.

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use cookie::time::Duration;
use cookie::{Cookie, SameSite};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{QuillpadError, Result};

/// Name of the session cookie.
pub const TOKEN_COOKIE: &str = "token";

/// Sessions last one day.
pub const TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

const TOKEN_CONTEXT: &str = "quillpad session token v1";

/// Key used to authenticate session tokens, derived from the server secret.
#[derive(Clone)]
pub struct SigningKey([u8; 32]);

impl SigningKey {
    pub fn from_secret(secret: &str) -> Self {
        Self(blake3::derive_key(TOKEN_CONTEXT, secret.as_bytes()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenClaims {
    user_id: i64,
    expires_at: i64,
}

/// Issues a signed session token for `user_id`, valid for [`TOKEN_TTL_SECS`].
pub fn issue_token(key: &SigningKey, user_id: i64) -> Result<String> {
    let claims = TokenClaims {
        user_id,
        expires_at: unix_now() + TOKEN_TTL_SECS,
    };
    let payload = serde_json::to_vec(&claims)?;
    let tag = blake3::keyed_hash(&key.0, &payload);
    Ok(format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(&payload),
        URL_SAFE_NO_PAD.encode(tag.as_bytes())
    ))
}

/// Verifies a session token and returns the user id it was issued for.
///
/// Any malformed, tampered, or expired token maps to
/// [`QuillpadError::InvalidToken`]; callers never learn which check failed.
pub fn verify_token(key: &SigningKey, token: &str) -> Result<i64> {
    let (payload_b64, tag_b64) = token.split_once('.').ok_or(QuillpadError::InvalidToken)?;
    let payload = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| QuillpadError::InvalidToken)?;
    let tag_bytes = URL_SAFE_NO_PAD
        .decode(tag_b64)
        .map_err(|_| QuillpadError::InvalidToken)?;
    let tag: [u8; 32] = tag_bytes
        .try_into()
        .map_err(|_| QuillpadError::InvalidToken)?;

    // blake3::Hash compares in constant time.
    if blake3::Hash::from(tag) != blake3::keyed_hash(&key.0, &payload) {
        return Err(QuillpadError::InvalidToken);
    }

    let claims: TokenClaims =
        serde_json::from_slice(&payload).map_err(|_| QuillpadError::InvalidToken)?;
    if claims.expires_at <= unix_now() {
        return Err(QuillpadError::InvalidToken);
    }
    Ok(claims.user_id)
}

/// Hashes a password with Argon2id and a fresh random salt.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| QuillpadError::PasswordHash(e.to_string()))?;
    Ok(hash.to_string())
}

/// Checks a password against a stored Argon2 hash string.
pub fn verify_password(password: &str, stored: &str) -> Result<bool> {
    let parsed =
        PasswordHash::new(stored).map_err(|e| QuillpadError::PasswordHash(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Builds the httpOnly session cookie carrying `token`.
pub fn session_cookie(token: &str) -> Cookie<'static> {
    Cookie::build((TOKEN_COOKIE, token.to_string()))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(Duration::seconds(TOKEN_TTL_SECS))
        .build()
}

/// Builds an immediately-expiring session cookie, used by logout.
pub fn clear_session_cookie() -> Cookie<'static> {
    Cookie::build((TOKEN_COOKIE, ""))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(Duration::ZERO)
        .build()
}

/// Pulls the session token out of a raw `Cookie` request header value.
pub fn token_from_cookie_header(header: &str) -> Option<String> {
    Cookie::split_parse(header)
        .filter_map(|c| c.ok())
        .find(|c| c.name() == TOKEN_COOKIE)
        .map(|c| c.value().to_string())
}

/// Generates a throwaway server secret for runs that configure none.
pub fn random_secret() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(24)
        .map(char::from)
        .collect()
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip() {
        let key = SigningKey::from_secret("secret");
        let token = issue_token(&key, 42).unwrap();
        assert_eq!(verify_token(&key, &token).unwrap(), 42);
    }

    #[test]
    fn test_token_rejected_with_wrong_key() {
        let key = SigningKey::from_secret("secret");
        let other = SigningKey::from_secret("different");
        let token = issue_token(&key, 42).unwrap();
        assert!(matches!(
            verify_token(&other, &token),
            Err(QuillpadError::InvalidToken)
        ));
    }

    #[test]
    fn test_spliced_token_is_rejected() {
        let key = SigningKey::from_secret("secret");
        let a = issue_token(&key, 1).unwrap();
        let b = issue_token(&key, 2).unwrap();
        let (payload_a, _) = a.split_once('.').unwrap();
        let (_, tag_b) = b.split_once('.').unwrap();
        let spliced = format!("{payload_a}.{tag_b}");
        assert!(verify_token(&key, &spliced).is_err());
    }

    #[test]
    fn test_malformed_tokens_are_rejected() {
        let key = SigningKey::from_secret("secret");
        for token in ["", "abc", "a.b", "a.b.c", "!!!.???"] {
            assert!(
                matches!(verify_token(&key, token), Err(QuillpadError::InvalidToken)),
                "token {token:?} should be invalid"
            );
        }
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let key = SigningKey::from_secret("secret");
        let claims = TokenClaims {
            user_id: 7,
            expires_at: unix_now() - 10,
        };
        let payload = serde_json::to_vec(&claims).unwrap();
        let tag = blake3::keyed_hash(&key.0, &payload);
        let token = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(tag.as_bytes())
        );
        assert!(matches!(
            verify_token(&key, &token),
            Err(QuillpadError::InvalidToken)
        ));
    }

    #[test]
    fn test_password_hash_and_verify() {
        let hash = hash_password("hunter2").unwrap();
        assert_ne!(hash, "hunter2");
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("hunter2", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn test_password_hashes_are_salted() {
        let a = hash_password("same").unwrap();
        let b = hash_password("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_session_cookie_attributes() {
        let cookie = session_cookie("tok123");
        assert_eq!(cookie.name(), TOKEN_COOKIE);
        assert_eq!(cookie.value(), "tok123");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.path(), Some("/"));

        let cleared = clear_session_cookie();
        assert_eq!(cleared.value(), "");
        assert_eq!(cleared.max_age(), Some(Duration::ZERO));
    }

    #[test]
    fn test_token_from_cookie_header() {
        assert_eq!(
            token_from_cookie_header("a=b; token=xyz; c=d"),
            Some("xyz".to_string())
        );
        assert_eq!(token_from_cookie_header("a=b; c=d"), None);
        assert_eq!(token_from_cookie_header(""), None);
    }
}
