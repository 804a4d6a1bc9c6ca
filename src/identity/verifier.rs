use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use super::jwks::KeySetCache;
use super::principal::Principal;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("key set unavailable: {0}")]
    KeySetUnavailable(String),
    #[error("identity authority timed out")]
    Timeout,
    #[error("code exchange failed: {0}")]
    Exchange(String),
    #[error("nonce mismatch")]
    NonceMismatch,
}

/// Claims read from access tokens and id tokens. Unknown claims are ignored.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: String,
    /// RBAC permission list, e.g. `["read:results"]`.
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Space-separated OAuth2 scopes.
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl Claims {
    pub fn has_capability(&self, capability: &str) -> bool {
        self.permissions.iter().any(|p| p == capability)
            || self.scope.as_deref().map(|s| s.split_whitespace().any(|p| p == capability)).unwrap_or(false)
    }

    pub fn principal(&self) -> Principal {
        Principal { sub: self.sub.clone(), name: self.name.clone(), email: self.email.clone() }
    }
}

/// Checks a compact JWT and returns its claims.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Claims, AuthError>;
}

/// Verifies tokens against the authority's published key set: signature, `exp`,
/// audience and issuer. The key lookup is bounded by `timeout`.
pub struct JwksVerifier {
    keys: Arc<KeySetCache>,
    audience: String,
    issuer: String,
    algorithms: Vec<Algorithm>,
    timeout: Duration,
}

impl JwksVerifier {
    pub fn new(keys: Arc<KeySetCache>, audience: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self { keys, audience: audience.into(), issuer: issuer.into(), algorithms: vec![Algorithm::RS256], timeout: Duration::from_secs(5) }
    }

    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.algorithms = algorithms;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `https://<domain>/`, the issuer Auth0-style authorities stamp into tokens.
    pub fn issuer_for_domain(domain: &str) -> String {
        format!("https://{}/", domain.trim_end_matches('/'))
    }
}

#[async_trait]
impl TokenVerifier for JwksVerifier {
    async fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let header = decode_header(token).map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        if !self.algorithms.contains(&header.alg) {
            return Err(AuthError::InvalidToken(format!("algorithm {:?} not accepted", header.alg)));
        }
        let kid = header.kid.ok_or_else(|| AuthError::InvalidToken("missing kid".into()))?;
        let jwks = tokio::time::timeout(self.timeout, self.keys.get()).await.map_err(|_| AuthError::Timeout)??;
        let jwk = jwks.find(&kid).ok_or_else(|| AuthError::InvalidToken(format!("unknown kid {kid}")))?;
        let key = DecodingKey::from_jwk(jwk).map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        let mut validation = Validation::new(header.alg);
        validation.algorithms = self.algorithms.clone();
        validation.set_audience(&[self.audience.as_str()]);
        validation.set_issuer(&[self.issuer.as_str()]);
        let data = decode::<Claims>(token, &key, &validation).map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        Ok(data.claims)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn accepts_valid_token_and_reads_permissions() {
        let claims = verifier().verify(&mint(claims_with(&["read:results"]))).await.unwrap();
        assert_eq!(claims.sub, "auth0|tester");
        assert!(claims.has_capability("read:results"));
        assert!(!claims.has_capability("write:results"));
    }

    #[tokio::test]
    async fn rejects_wrong_audience_issuer_and_expiry() {
        let v = verifier();
        let mut c = claims_with(&[]);
        c["aud"] = "someone-else".into();
        assert!(matches!(v.verify(&mint(c)).await, Err(AuthError::InvalidToken(_))));

        let mut c = claims_with(&[]);
        c["iss"] = "https://evil.example/".into();
        assert!(v.verify(&mint(c)).await.is_err());

        let mut c = claims_with(&[]);
        c["exp"] = (chrono::Utc::now().timestamp() - 3600).into();
        assert!(v.verify(&mint(c)).await.is_err());
    }

    #[tokio::test]
    async fn rejects_tampered_and_unknown_key() {
        let v = verifier();
        let token = mint(claims_with(&["read:results"]));
        let mut tampered = token.clone();
        tampered.push('x');
        assert!(v.verify(&tampered).await.is_err());

        let mut header = jsonwebtoken::Header::new(Algorithm::HS256);
        header.kid = Some("other".into());
        let other = jsonwebtoken::encode(&header, &claims_with(&[]), &jsonwebtoken::EncodingKey::from_secret(SECRET)).unwrap();
        assert!(v.verify(&other).await.is_err());

        assert!(v.verify("not-a-jwt").await.is_err());
    }

    #[tokio::test]
    async fn rejects_algorithms_outside_allow_list() {
        let rs_only = JwksVerifier::new(Arc::new(KeySetCache::with_keys(key_set())), AUDIENCE, ISSUER);
        let err = rs_only.verify(&mint(claims_with(&[]))).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn unreachable_authority_is_an_error_not_a_hang() {
        let client = reqwest::Client::new();
        let cache = Arc::new(KeySetCache::new("http://127.0.0.1:9/.well-known/jwks.json", client));
        let v = JwksVerifier::new(cache.clone(), AUDIENCE, ISSUER)
            .with_algorithms(vec![Algorithm::HS256])
            .with_timeout(Duration::from_millis(500));
        assert!(v.verify(&mint(claims_with(&[]))).await.is_err());
        assert!(cache.cached().is_none());
    }

    #[test]
    fn scope_string_also_grants() {
        let c = Claims { sub: "s".into(), scope: Some("openid read:results".into()), ..Default::default() };
        assert!(c.has_capability("read:results"));
    }
}
