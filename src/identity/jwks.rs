use std::sync::Arc;

use jsonwebtoken::jwk::JwkSet;
use parking_lot::RwLock;
use tracing::{info, warn};

use super::AuthError;

/// Process-scoped cache of the identity authority's signing keys.
///
/// Filled on first use and never invalidated; rotated keys are only picked up by a restart.
/// Concurrent first uses may each fetch; the last completed fetch is kept. Readers always
/// get a whole `Arc<JwkSet>`, never a partially written one.
pub struct KeySetCache {
    url: String,
    http: reqwest::Client,
    keys: RwLock<Option<Arc<JwkSet>>>,
}

impl KeySetCache {
    pub fn new(url: impl Into<String>, http: reqwest::Client) -> Self {
        Self { url: url.into(), http, keys: RwLock::new(None) }
    }

    /// A cache that starts populated and never goes to the network.
    pub fn with_keys(keys: JwkSet) -> Self {
        Self { url: String::new(), http: reqwest::Client::new(), keys: RwLock::new(Some(Arc::new(keys))) }
    }

    /// `https://<domain>/.well-known/jwks.json`
    pub fn url_for_domain(domain: &str) -> String {
        format!("https://{}/.well-known/jwks.json", domain.trim_end_matches('/'))
    }

    pub fn cached(&self) -> Option<Arc<JwkSet>> {
        self.keys.read().clone()
    }

    pub async fn get(&self) -> Result<Arc<JwkSet>, AuthError> {
        if let Some(keys) = self.cached() {
            return Ok(keys);
        }
        let fetched = self.fetch().await.map_err(|e| {
            warn!(target: "auth", "key set fetch from {} failed: {e}", self.url);
            AuthError::KeySetUnavailable(e.to_string())
        })?;
        let keys = Arc::new(fetched);
        *self.keys.write() = Some(keys.clone());
        info!(target: "auth", "key set loaded from {} ({} keys)", self.url, keys.keys.len());
        Ok(keys)
    }

    async fn fetch(&self) -> reqwest::Result<JwkSet> {
        self.http.get(&self.url).send().await?.error_for_status()?.json::<JwkSet>().await
    }
}
