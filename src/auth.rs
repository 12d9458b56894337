//! Password digests and signed access tokens.
//!
//! Tokens are HS256 JWTs carrying the user id plus `iat`/`exp`. There is no
//! revocation: a token stays valid until `exp` passes.
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use jwt::{Header, SignWithKey, Token, VerifyWithKey};
use ring::hmac as digest;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("wrong e-mail or password")]
    InvalidCredentials,
    #[error("no access token was provided")]
    MissingToken,
    #[error("malformed access token: {0}")]
    Malformed(#[source] jwt::Error),
    #[error("access token has expired")]
    Expired,
    #[error("failed to sign access token: {0}")]
    Signing(#[source] jwt::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub id: i64,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Clone)]
pub struct Auth {
    signing_key: Hmac<Sha256>,
    salt: digest::Key,
    token_ttl: Duration,
}

impl Auth {
    pub fn new(secret: &str, salt: &str, token_ttl: Duration) -> Auth {
        let signing_key = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
        let salt = digest::Key::new(digest::HMAC_SHA256, salt.as_bytes());
        Auth {
            signing_key,
            salt,
            token_ttl,
        }
    }

    /// Deterministic: the same password always gives the same digest, so it
    /// can be compared in a lookup. The salt is shared by every user.
    pub fn hash_password(&self, password: &str) -> String {
        let tag = digest::sign(&self.salt, password.as_bytes());
        hex::encode(tag.as_ref())
    }

    pub fn sign(&self, user_id: i64) -> Result<String, AuthError> {
        self.sign_at(user_id, Utc::now())
    }

    pub fn sign_at(&self, user_id: i64, issued_at: DateTime<Utc>) -> Result<String, AuthError> {
        let claims = TokenClaims {
            id: user_id,
            iat: issued_at.timestamp(),
            exp: (issued_at + self.token_ttl).timestamp(),
        };
        claims.sign_with_key(&self.signing_key).map_err(AuthError::Signing)
    }

    pub fn validate(&self, token: &str) -> Result<i64, AuthError> {
        self.validate_at(token, Utc::now())
    }

    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<i64, AuthError> {
        // rejects any header algorithm other than the key's HS256
        let token: Token<Header, TokenClaims, _> = token
            .verify_with_key(&self.signing_key)
            .map_err(AuthError::Malformed)?;
        let claims = token.claims();
        if now.timestamp() > claims.exp {
            return Err(AuthError::Expired);
        }
        Ok(claims.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sha2::Sha384;

    fn auth() -> Auth {
        Auth::new("signing secret", "salt", Duration::hours(12))
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn hash_password_test() {
        let auth = auth();
        let hash = auth.hash_password("MadokaMadoka");
        assert_eq!(hash, auth.hash_password("MadokaMadoka"));
        assert_ne!(hash, auth.hash_password("MadokaMadokb"));
        assert_ne!(hash, "MadokaMadoka");
        assert_eq!(hash.len(), 64);

        let other_salt = Auth::new("signing secret", "pepper", Duration::hours(12));
        assert_ne!(hash, other_salt.hash_password("MadokaMadoka"));
    }

    #[test]
    fn token_round_trip() {
        let auth = auth();
        let token = auth.sign(42).unwrap();
        assert_eq!(auth.validate(&token).unwrap(), 42);
    }

    #[test]
    fn token_carries_issue_and_expiry() {
        let auth = auth();
        let token = auth.sign_at(7, start()).unwrap();
        let token: Token<Header, TokenClaims, _> = token.as_str().verify_with_key(&auth.signing_key).unwrap();
        let claims = token.claims();
        assert_eq!(claims.id, 7);
        assert_eq!(claims.iat, start().timestamp());
        assert_eq!(claims.exp - claims.iat, 12 * 60 * 60);
    }

    #[test]
    fn token_expiry_boundary() {
        let auth = auth();
        let token = auth.sign_at(7, start()).unwrap();
        let expiry = start() + Duration::hours(12);

        let before = expiry - Duration::seconds(1);
        assert_eq!(auth.validate_at(&token, before).unwrap(), 7);

        let after = expiry + Duration::seconds(1);
        assert!(matches!(auth.validate_at(&token, after), Err(AuthError::Expired)));
    }

    #[test]
    fn any_secret_length_is_a_key() {
        let long = "s".repeat(1024);
        for secret in ["", "k", long.as_str()] {
            let auth = Auth::new(secret, "salt", Duration::hours(1));
            let token = auth.sign(3).unwrap();
            assert_eq!(auth.validate(&token).unwrap(), 3);
        }
    }

    #[test]
    fn token_from_another_secret_is_rejected() {
        let other = Auth::new("another secret", "salt", Duration::hours(12));
        let token = other.sign(7).unwrap();
        assert!(matches!(auth().validate(&token), Err(AuthError::Malformed(_))));
    }

    #[test]
    fn token_with_other_algorithm_is_rejected() {
        let now = Utc::now().timestamp();
        let claims = TokenClaims {
            id: 7,
            iat: now,
            exp: now + 60,
        };
        let key = Hmac::<Sha384>::new_from_slice(b"signing secret").unwrap();
        let token = claims.sign_with_key(&key).unwrap();
        assert!(matches!(
            auth().validate(&token),
            Err(AuthError::Malformed(jwt::Error::AlgorithmMismatch(..)))
        ));
    }

    #[test]
    fn token_with_foreign_claims_is_rejected() {
        #[derive(Serialize)]
        struct Foreign {
            sub: String,
        }

        let auth = auth();
        let foreign = Foreign { sub: "7".to_string() };
        let token = foreign.sign_with_key(&auth.signing_key).unwrap();
        assert!(matches!(auth.validate(&token), Err(AuthError::Malformed(_))));
        assert!(matches!(auth.validate("not a token"), Err(AuthError::Malformed(_))));
    }
}
