//! Signed token verification.

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Why a token was rejected.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("token verification failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("token has no subject")]
    MissingSubject,

    #[error("invalid verifier key: {0}")]
    InvalidKey(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

/// Identity established by a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    pub subject: String,
    pub issuer: String,
    pub scopes: Vec<String>,
}

/// Verifies a raw bearer token against an identity provider.
pub trait TokenVerifier: Send + Sync + 'static {
    fn verify(&self, token: &str) -> Result<VerifiedToken, VerifyError>;
}

/// Claims read from an identity provider token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: String,
    pub iss: String,
    pub exp: i64,
    #[serde(default)]
    pub scope: Vec<String>,
}

/// Verifies JWTs signed with a shared secret or a PEM public key.
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("algorithms", &self.validation.algorithms)
            .field("issuer", &self.validation.iss)
            .finish_non_exhaustive()
    }
}

impl JwtVerifier {
    /// Builds an HMAC verifier. `algorithm` must be HS256, HS384 or HS512.
    pub fn with_secret(
        algorithm: Algorithm,
        secret: &[u8],
        issuer: &str,
    ) -> Result<Self, VerifyError> {
        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(VerifyError::UnsupportedAlgorithm(format!("{algorithm:?}")));
        }
        Ok(Self::new(algorithm, DecodingKey::from_secret(secret), issuer))
    }

    /// Builds an RSA or EC verifier from a PEM-encoded public key.
    pub fn with_public_key_pem(
        algorithm: Algorithm,
        pem: &[u8],
        issuer: &str,
    ) -> Result<Self, VerifyError> {
        let key = match algorithm {
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => {
                DecodingKey::from_rsa_pem(pem)
            }
            Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(pem),
            other => return Err(VerifyError::UnsupportedAlgorithm(format!("{other:?}"))),
        }
        .map_err(|e| VerifyError::InvalidKey(e.to_string()))?;
        Ok(Self::new(algorithm, key, issuer))
    }

    fn new(algorithm: Algorithm, decoding_key: DecodingKey, issuer: &str) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[issuer]);
        validation.set_required_spec_claims(&["exp", "iss"]);
        validation.set_audience(&["perm"]);
        Self {
            decoding_key,
            validation,
        }
    }

    /// Sets the expected audience. An empty audience disables the check.
    pub fn with_audience(mut self, audience: &str) -> Self {
        if audience.is_empty() {
            self.validation.aud = None;
            self.validation.validate_aud = false;
        } else {
            self.validation.set_audience(&[audience]);
            self.validation.validate_aud = true;
        }
        self
    }

    /// Sets the clock skew tolerance for `exp` and `nbf`.
    pub fn with_leeway(mut self, leeway_secs: u64) -> Self {
        self.validation.leeway = leeway_secs;
        self
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<VerifiedToken, VerifyError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)?;
        let claims = data.claims;
        if claims.sub.is_empty() {
            return Err(VerifyError::MissingSubject);
        }
        Ok(VerifiedToken {
            subject: claims.sub,
            issuer: claims.iss,
            scopes: claims.scope,
        })
    }
}

/// Parses an algorithm name as written in configuration.
pub fn parse_algorithm(name: &str) -> Result<Algorithm, VerifyError> {
    name.to_uppercase()
        .parse::<Algorithm>()
        .map_err(|_| VerifyError::UnsupportedAlgorithm(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header};
    use std::time::{SystemTime, UNIX_EPOCH};

    const ISSUER: &str = "http://localhost:6789";
    const SECRET: &[u8] = b"tokensecret";

    fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        iss: String,
        exp: i64,
        aud: Vec<String>,
        scope: Vec<String>,
    }

    fn mint(claims: &TestClaims, secret: &[u8]) -> String {
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret),
        )
        .unwrap()
    }

    fn claims(sub: &str) -> TestClaims {
        TestClaims {
            sub: sub.to_string(),
            iss: ISSUER.to_string(),
            exp: now() + 300,
            aud: vec!["perm".to_string()],
            scope: vec!["perm.admin".to_string()],
        }
    }

    fn verifier() -> JwtVerifier {
        JwtVerifier::with_secret(Algorithm::HS256, SECRET, ISSUER).unwrap()
    }

    #[test]
    fn test_valid_token_is_verified() {
        let token = mint(&claims("user-1"), SECRET);
        let verified = verifier().verify(&token).unwrap();
        assert_eq!(verified.subject, "user-1");
        assert_eq!(verified.issuer, ISSUER);
        assert_eq!(verified.scopes, vec!["perm.admin".to_string()]);
    }

    #[test]
    fn test_bad_signature_is_rejected() {
        let token = mint(&claims("user-1"), b"othersecret");
        let err = verifier().verify(&token).unwrap_err();
        assert!(err.to_string().contains("InvalidSignature"), "got {err}");
    }

    #[test]
    fn test_wrong_issuer_is_rejected() {
        let mut c = claims("user-1");
        c.iss = "http://evil.example".to_string();
        let err = verifier().verify(&mint(&c, SECRET)).unwrap_err();
        assert!(err.to_string().contains("InvalidIssuer"), "got {err}");
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let mut c = claims("user-1");
        c.exp = now() - 3600;
        let err = verifier().with_leeway(0).verify(&mint(&c, SECRET)).unwrap_err();
        assert!(err.to_string().contains("ExpiredSignature"), "got {err}");
    }

    #[test]
    fn test_audience_check_can_be_disabled() {
        let mut c = claims("user-1");
        c.aud = vec!["cloud_controller".to_string()];
        let token = mint(&c, SECRET);

        assert!(verifier().verify(&token).is_err());
        assert!(verifier().with_audience("").verify(&token).is_ok());
        assert!(verifier()
            .with_audience("cloud_controller")
            .verify(&token)
            .is_ok());
    }

    #[test]
    fn test_missing_subject_is_rejected() {
        let token = mint(&claims(""), SECRET);
        assert!(matches!(
            verifier().verify(&token),
            Err(VerifyError::MissingSubject)
        ));
    }

    #[test]
    fn test_garbage_token_is_rejected() {
        assert!(verifier().verify("not-a-jwt").is_err());
    }

    #[test]
    fn test_key_algorithm_mismatch() {
        assert!(matches!(
            JwtVerifier::with_secret(Algorithm::RS256, SECRET, ISSUER),
            Err(VerifyError::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(
            JwtVerifier::with_public_key_pem(Algorithm::RS256, b"not a pem", ISSUER),
            Err(VerifyError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_parse_algorithm() {
        assert_eq!(parse_algorithm("hs256").unwrap(), Algorithm::HS256);
        assert_eq!(parse_algorithm("RS256").unwrap(), Algorithm::RS256);
        assert!(parse_algorithm("none").is_err());
    }
}
