use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use super::principal::Principal;
use super::verifier::{AuthError, Claims, TokenVerifier};

/// Result of a completed authorization-code exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    pub principal: Principal,
    pub access_token: Option<String>,
}

/// The external identity authority as seen by the login endpoints.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Where to send the browser to start a login.
    fn authorize_url(&self, state: &str, nonce: &str) -> String;

    /// Exchange an authorization code, verify the id token and its nonce.
    async fn complete_login(&self, code: &str, nonce: &str) -> Result<LoginOutcome, AuthError>;

    /// Where to send the browser after the local session is cleared.
    fn logout_url(&self) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub domain: String,
    pub client_id: String,
    pub client_secret: String,
    pub callback_url: String,
    pub audience: Option<String>,
    /// Where the authority returns the browser after logout.
    pub return_to: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    id_token: String,
}

/// Auth0-style OAuth2/OIDC authorization-code client.
pub struct OAuthProvider {
    settings: OAuthSettings,
    http: reqwest::Client,
    id_tokens: Arc<dyn TokenVerifier>,
    timeout: Duration,
}

impl OAuthProvider {
    /// `id_tokens` must verify with audience = client id; it normally shares the key-set
    /// cache with the bearer verifier.
    pub fn new(settings: OAuthSettings, http: reqwest::Client, id_tokens: Arc<dyn TokenVerifier>, timeout: Duration) -> Self {
        Self { settings, http, id_tokens, timeout }
    }

    fn base(&self) -> String {
        format!("https://{}", self.settings.domain.trim_end_matches('/'))
    }

    async fn exchange(&self, code: &str) -> Result<TokenResponse, AuthError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", self.settings.callback_url.as_str()),
        ];
        let send = async {
            self.http
                .post(format!("{}/oauth/token", self.base()))
                .form(&form)
                .send()
                .await?
                .error_for_status()?
                .json::<TokenResponse>()
                .await
        };
        tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| AuthError::Timeout)?
            .map_err(|e| AuthError::Exchange(e.to_string()))
    }
}

/// Verify an id token and check that it echoes the nonce minted for this login.
pub(crate) async fn verify_id_token(verifier: &dyn TokenVerifier, id_token: &str, nonce: &str) -> Result<Claims, AuthError> {
    let claims = verifier.verify(id_token).await?;
    if claims.nonce.as_deref() != Some(nonce) {
        warn!(target: "auth", "id token nonce mismatch for sub={}", claims.sub);
        return Err(AuthError::NonceMismatch);
    }
    Ok(claims)
}

#[async_trait]
impl AuthProvider for OAuthProvider {
    fn authorize_url(&self, state: &str, nonce: &str) -> String {
        let mut url = format!(
            "{}/authorize?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}&nonce={}",
            self.base(),
            urlencoding::encode(&self.settings.client_id),
            urlencoding::encode(&self.settings.callback_url),
            urlencoding::encode("openid profile email"),
            urlencoding::encode(state),
            urlencoding::encode(nonce),
        );
        if let Some(aud) = &self.settings.audience {
            url.push_str("&audience=");
            url.push_str(&urlencoding::encode(aud));
        }
        url
    }

    async fn complete_login(&self, code: &str, nonce: &str) -> Result<LoginOutcome, AuthError> {
        let tokens = self.exchange(code).await.inspect_err(|e| warn!(target: "auth", "code exchange failed: {e}"))?;
        let claims = verify_id_token(self.id_tokens.as_ref(), &tokens.id_token, nonce).await?;
        info!(target: "auth", "login completed sub={}", claims.sub);
        Ok(LoginOutcome { principal: claims.principal(), access_token: tokens.access_token })
    }

    fn logout_url(&self) -> Option<String> {
        Some(format!(
            "{}/v2/logout?client_id={}&returnTo={}",
            self.base(),
            urlencoding::encode(&self.settings.client_id),
            urlencoding::encode(&self.settings.return_to),
        ))
    }
}
