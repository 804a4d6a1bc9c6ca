//! Environment-driven server configuration.
//!
//! Every setting has an environment variable; the server binary lets CLI flags override a
//! few of them. Validation happens once at startup so a misconfigured deployment fails
//! before it binds a port.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Basic,
    Session,
    Bearer,
}

impl AuthMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" | "shared" | "shared_secret" => Some(AuthMode::Basic),
            "session" => Some(AuthMode::Session),
            "bearer" | "jwt" => Some(AuthMode::Bearer),
            _ => None,
        }
    }
}

/// Identity authority settings (Auth0-style tenant).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityConfig {
    pub domain: String,
    pub audience: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub callback_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown auth mode '{0}' (expected basic, session or bearer)")]
    UnknownAuthMode(String),
    #[error("invalid value for {0}: '{1}'")]
    InvalidValue(&'static str, String),
    #[error("auth mode '{0}' requires AUTH0_DOMAIN")]
    MissingDomain(&'static str),
    #[error("bearer auth requires AUTH0_AUDIENCE")]
    MissingAudience,
    #[error("session auth requires AUTH0_CLIENT_ID and AUTH0_CLIENT_SECRET")]
    MissingClient,
    #[error("cannot generate a session key: {0}")]
    Entropy(String),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub http_port: u16,
    pub upload_dir: PathBuf,
    pub auth_modes: Vec<AuthMode>,
    pub shared_secret: Option<String>,
    pub identity: Option<IdentityConfig>,
    pub session_key: Vec<u8>,
    pub session_ttl: Duration,
    pub cookie_secure: bool,
    pub auth_timeout: Duration,
}

fn random_key() -> Result<Vec<u8>, ConfigError> {
    let mut key = vec![0u8; 32];
    getrandom::getrandom(&mut key).map_err(|e| ConfigError::Entropy(e.to_string()))?;
    Ok(key)
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from any key lookup; empty values count as unset.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self, ConfigError> {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut cfg = ServerConfig {
            bind: "0.0.0.0".into(),
            http_port: 8000,
            upload_dir: PathBuf::from("uploads"),
            auth_modes: vec![AuthMode::Basic],
            shared_secret: None,
            identity: None,
            session_key: Vec::new(),
            session_ttl: Duration::from_secs(8 * 60 * 60),
            cookie_secure: true,
            auth_timeout: Duration::from_millis(5000),
        };

        if let Some(v) = get("RESULTS_BIND") { cfg.bind = v; }
        if let Some(v) = get("RESULTS_HTTP_PORT") {
            cfg.http_port = v.parse().map_err(|_| ConfigError::InvalidValue("RESULTS_HTTP_PORT", v.clone()))?;
        }
        if let Some(v) = get("RESULTS_UPLOAD_DIR") { cfg.upload_dir = PathBuf::from(v); }
        if let Some(v) = get("RESULTS_AUTH_MODES") {
            cfg.auth_modes = v
                .split(',')
                .filter(|m| !m.trim().is_empty())
                .map(|m| AuthMode::parse(m).ok_or_else(|| ConfigError::UnknownAuthMode(m.trim().to_string())))
                .collect::<Result<_, _>>()?;
        }
        cfg.shared_secret = get("RESULTS_SHARED_SECRET");
        cfg.session_key = match get("RESULTS_SESSION_KEY") {
            Some(v) => v.into_bytes(),
            None => random_key()?,
        };
        if let Some(v) = get("RESULTS_SESSION_TTL_SECS") {
            let secs: u64 = v.parse().map_err(|_| ConfigError::InvalidValue("RESULTS_SESSION_TTL_SECS", v.clone()))?;
            cfg.session_ttl = Duration::from_secs(secs);
        }
        if let Some(v) = get("RESULTS_COOKIE_SECURE") {
            cfg.cookie_secure = parse_bool(&v).ok_or_else(|| ConfigError::InvalidValue("RESULTS_COOKIE_SECURE", v.clone()))?;
        }
        if let Some(v) = get("RESULTS_AUTH_TIMEOUT_MS") {
            let ms: u64 = v.parse().map_err(|_| ConfigError::InvalidValue("RESULTS_AUTH_TIMEOUT_MS", v.clone()))?;
            cfg.auth_timeout = Duration::from_millis(ms);
        }
        cfg.identity = get("AUTH0_DOMAIN").map(|domain| IdentityConfig {
            domain,
            audience: get("AUTH0_AUDIENCE"),
            client_id: get("AUTH0_CLIENT_ID"),
            client_secret: get("AUTH0_CLIENT_SECRET"),
            callback_url: get("AUTH0_CALLBACK_URL").unwrap_or_else(|| "http://localhost:8000/callback".into()),
        });

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for mode in &self.auth_modes {
            match mode {
                AuthMode::Basic => {}
                AuthMode::Session => {
                    let id = self.identity.as_ref().ok_or(ConfigError::MissingDomain("session"))?;
                    if id.client_id.is_none() || id.client_secret.is_none() {
                        return Err(ConfigError::MissingClient);
                    }
                }
                AuthMode::Bearer => {
                    let id = self.identity.as_ref().ok_or(ConfigError::MissingDomain("bearer"))?;
                    if id.audience.is_none() {
                        return Err(ConfigError::MissingAudience);
                    }
                }
            }
        }
        Ok(())
    }

    /// Shared-secret mode with no secret grants every request.
    pub fn is_open_mode(&self) -> bool {
        self.auth_modes.contains(&AuthMode::Basic) && self.shared_secret.is_none()
    }

    /// Login endpoints are mounted when client credentials are present.
    pub fn login_enabled(&self) -> bool {
        self.identity.as_ref().map(|i| i.client_id.is_some() && i.client_secret.is_some()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(pairs: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ServerConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_are_open_basic() {
        let cfg = from(&[]).unwrap();
        assert_eq!(cfg.http_port, 8000);
        assert_eq!(cfg.upload_dir, PathBuf::from("uploads"));
        assert_eq!(cfg.auth_modes, vec![AuthMode::Basic]);
        assert!(cfg.is_open_mode());
        assert!(!cfg.login_enabled());
        assert_eq!(cfg.session_key.len(), 32);
    }

    #[test]
    fn generated_session_keys_are_random() {
        let a = from(&[]).unwrap().session_key;
        let b = from(&[]).unwrap().session_key;
        assert!(a.iter().any(|&x| x != 0));
        assert_ne!(a, b);
    }

    #[test]
    fn reads_values_and_mode_lists() {
        let cfg = from(&[
            ("RESULTS_HTTP_PORT", "9100"),
            ("RESULTS_UPLOAD_DIR", "/srv/uploads"),
            ("RESULTS_AUTH_MODES", "basic, bearer"),
            ("RESULTS_SHARED_SECRET", "lab"),
            ("AUTH0_DOMAIN", "tenant.example"),
            ("AUTH0_AUDIENCE", "https://results.example/api"),
            ("RESULTS_COOKIE_SECURE", "off"),
            ("RESULTS_SESSION_KEY", "k"),
        ])
        .unwrap();
        assert_eq!(cfg.http_port, 9100);
        assert_eq!(cfg.auth_modes, vec![AuthMode::Basic, AuthMode::Bearer]);
        assert!(!cfg.is_open_mode());
        assert!(!cfg.cookie_secure);
        assert_eq!(cfg.session_key, b"k".to_vec());
        assert_eq!(cfg.identity.unwrap().callback_url, "http://localhost:8000/callback");
    }

    #[test]
    fn rejects_incomplete_identity_settings() {
        assert_eq!(from(&[("RESULTS_AUTH_MODES", "bearer")]).unwrap_err(), ConfigError::MissingDomain("bearer"));
        assert_eq!(
            from(&[("RESULTS_AUTH_MODES", "bearer"), ("AUTH0_DOMAIN", "t.example")]).unwrap_err(),
            ConfigError::MissingAudience
        );
        assert_eq!(
            from(&[("RESULTS_AUTH_MODES", "session"), ("AUTH0_DOMAIN", "t.example")]).unwrap_err(),
            ConfigError::MissingClient
        );
        assert!(matches!(from(&[("RESULTS_AUTH_MODES", "kerberos")]), Err(ConfigError::UnknownAuthMode(_))));
        assert!(matches!(from(&[("RESULTS_HTTP_PORT", "eighty")]), Err(ConfigError::InvalidValue(..))));
    }
}
