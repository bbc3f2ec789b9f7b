use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

// Sessions last 30 days, matching the sign-in flow that mints them.
const TOKEN_TTL_SECS: u64 = 30 * 24 * 60 * 60;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("invalid or expired credential")]
    Invalid,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: u64,
    exp: u64,
}

// Verifies the bearer token presented on the websocket upgrade URL or the
// Authorization header. Verification is pure: no I/O, no retries, and a
// failure is terminal for that attempt.
pub struct TokenVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        TokenVerifier {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }

    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        let data =
            decode::<Claims>(token, &self.decoding, &self.validation).map_err(|_| AuthError::Invalid)?;
        Ok(data.claims.sub)
    }

    pub fn issue(&self, user_id: &str) -> Result<String, AuthError> {
        let now = unix_now();
        self.issue_with_exp(user_id, now, now + TOKEN_TTL_SECS)
    }

    fn issue_with_exp(&self, user_id: &str, iat: u64, exp: u64) -> Result<String, AuthError> {
        let claims = Claims {
            sub: user_id.to_string(),
            iat,
            exp,
        };
        encode(&Header::default(), &claims, &self.encoding).map_err(|_| AuthError::Invalid)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies_to_its_subject() {
        let verifier = TokenVerifier::new("test-secret");
        let token = verifier.issue("user-1").unwrap();
        assert_eq!(verifier.verify(&token).unwrap(), "user-1");
    }

    #[test]
    fn garbage_token_is_rejected() {
        let verifier = TokenVerifier::new("test-secret");
        assert!(matches!(
            verifier.verify("not.a.token"),
            Err(AuthError::Invalid)
        ));
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let signer = TokenVerifier::new("secret-a");
        let verifier = TokenVerifier::new("secret-b");
        let token = signer.issue("user-1").unwrap();
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let verifier = TokenVerifier::new("test-secret");
        // Well past the default validation leeway.
        let now = unix_now();
        let token = verifier
            .issue_with_exp("user-1", now - 7200, now - 3600)
            .unwrap();
        assert!(matches!(verifier.verify(&token), Err(AuthError::Invalid)));
    }
}
