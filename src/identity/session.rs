use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, HeaderValue};
use base64::Engine;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use sha2::Sha256;
use tracing::debug;

use super::principal::Principal;
use crate::security::constant_time_eq;

pub const SESSION_COOKIE: &str = "results_session";

type HmacSha256 = Hmac<Sha256>;

/// Where a session is in the login handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// `/login` issued; waiting for the authority to redirect back with this state.
    PendingLogin { state: String, nonce: String },
    /// Callback verified.
    Authenticated { principal: Principal, access_token: Option<String> },
}

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub state: SessionState,
    pub issued_at: Instant,
    pub expires_at: Instant,
}

impl Session {
    pub fn principal(&self) -> Option<&Principal> {
        match &self.state {
            SessionState::Authenticated { principal, .. } => Some(principal),
            SessionState::PendingLogin { .. } => None,
        }
    }

    pub fn access_token(&self) -> Option<&str> {
        match &self.state {
            SessionState::Authenticated { access_token, .. } => access_token.as_deref(),
            SessionState::PendingLogin { .. } => None,
        }
    }
}

/// Parameters minted for one login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLogin {
    pub session_id: String,
    pub state: String,
    pub nonce: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("no pending login for this session")]
    NoPendingLogin,
    #[error("state parameter mismatch")]
    StateMismatch,
    #[error("OS randomness unavailable")]
    Entropy,
}

pub(crate) fn gen_id() -> Result<String, SessionError> {
    // 256-bit random token base64url without padding
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf).map_err(|_| SessionError::Entropy)?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

pub fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for cookie in headers.get_all("cookie") {
        let Ok(s) = cookie.to_str() else { continue; };
        for part in s.split(';') {
            let p = part.trim();
            if let Some((k, v)) = p.split_once('=') {
                if k == name { return Some(v.to_string()); }
            }
        }
    }
    None
}

/// Server-side session table. Cloning shares the same table.
///
/// Sessions move `PendingLogin -> Authenticated -> removed`; each transition is an explicit
/// method here. Cookies carry `<sid>.<hmac>` so a forged or truncated id is never looked up.
#[derive(Clone)]
pub struct SessionManager {
    pub ttl: Duration,
    pub secure_cookie: bool,
    key: Arc<Vec<u8>>,
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionManager {
    pub fn new(key: Vec<u8>, ttl: Duration) -> Self {
        Self { ttl, secure_cookie: true, key: Arc::new(key), sessions: Arc::new(RwLock::new(HashMap::new())) }
    }

    pub fn with_secure_cookie(mut self, secure: bool) -> Self {
        self.secure_cookie = secure;
        self
    }

    fn mac(&self, sid: &str) -> Option<String> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.key).ok()?;
        mac.update(sid.as_bytes());
        Some(hex::encode(mac.finalize().into_bytes()))
    }

    /// Cookie value for a session id.
    pub fn sign(&self, sid: &str) -> String {
        format!("{}.{}", sid, self.mac(sid).unwrap_or_default())
    }

    /// Recover the session id from a cookie value, or None if the signature does not verify.
    pub fn unsign(&self, value: &str) -> Option<String> {
        let (sid, sig) = value.rsplit_once('.')?;
        if sid.is_empty() { return None; }
        let expected = self.mac(sid)?;
        if constant_time_eq(expected.as_bytes(), sig.as_bytes()) { Some(sid.to_string()) } else { None }
    }

    /// Session id from the request's cookie header, if signed by this manager.
    pub fn session_id_from_headers(&self, headers: &HeaderMap) -> Option<String> {
        let raw = parse_cookie(headers, SESSION_COOKIE)?;
        self.unsign(&raw)
    }

    /// Expired entries, including abandoned logins, are swept on every insert.
    fn insert(&self, state: SessionState) -> Result<Session, SessionError> {
        let now = Instant::now();
        let sess = Session { session_id: gen_id()?, state, issued_at: now, expires_at: now + self.ttl };
        let mut map = self.sessions.write();
        map.retain(|_, s| s.expires_at > now);
        map.insert(sess.session_id.clone(), sess.clone());
        debug!(target: "session", "session table size={}", map.len());
        Ok(sess)
    }

    /// Start a login attempt: fresh session holding a one-time state and nonce.
    pub fn begin_login(&self) -> Result<PendingLogin, SessionError> {
        let state = gen_id()?;
        let nonce = gen_id()?;
        let sess = self.insert(SessionState::PendingLogin { state: state.clone(), nonce: nonce.clone() })?;
        debug!(target: "session", "login pending");
        Ok(PendingLogin { session_id: sess.session_id, state, nonce })
    }

    /// Consume the pending login for `sid` and return its nonce if `state` matches.
    /// The pending entry is removed either way, so a callback cannot be replayed.
    pub fn take_pending(&self, sid: &str, state: &str) -> Result<String, SessionError> {
        let removed = self.sessions.write().remove(sid);
        let Some(sess) = removed else { return Err(SessionError::NoPendingLogin); };
        match sess.state {
            SessionState::PendingLogin { state: expected, nonce } if sess.expires_at > Instant::now() => {
                if constant_time_eq(expected.as_bytes(), state.as_bytes()) { Ok(nonce) } else { Err(SessionError::StateMismatch) }
            }
            SessionState::PendingLogin { .. } => Err(SessionError::NoPendingLogin),
            other => {
                // Not a login in progress; put it back untouched.
                self.sessions.write().insert(sid.to_string(), Session { state: other, ..sess });
                Err(SessionError::NoPendingLogin)
            }
        }
    }

    /// Record a completed login under a new session id.
    pub fn establish(&self, principal: Principal, access_token: Option<String>) -> Result<Session, SessionError> {
        let sub = principal.sub.clone();
        let sess = self.insert(SessionState::Authenticated { principal, access_token })?;
        debug!(target: "session", "session established sub={}", sub);
        Ok(sess)
    }

    /// Live session for `sid`. Expired entries are dropped on the way.
    pub fn validate(&self, sid: &str) -> Option<Session> {
        let now = Instant::now();
        let mut expired = false;
        let out = {
            let map = self.sessions.read();
            match map.get(sid) {
                Some(s) if s.expires_at > now => Some(s.clone()),
                Some(_) => { expired = true; None }
                None => None,
            }
        };
        if expired {
            self.sessions.write().remove(sid);
        }
        out
    }

    /// Authenticated session referenced by the request cookie.
    pub fn from_headers(&self, headers: &HeaderMap) -> Option<Session> {
        let sid = self.session_id_from_headers(headers)?;
        self.validate(&sid).filter(|s| s.principal().is_some())
    }

    pub fn logout(&self, sid: &str) -> bool {
        self.sessions.write().remove(sid).is_some()
    }

    pub fn session_cookie(&self, sid: &str) -> HeaderValue {
        let secure = if self.secure_cookie { "; Secure" } else { "" };
        let v = format!("{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}{}", SESSION_COOKIE, self.sign(sid), self.ttl.as_secs(), secure);
        HeaderValue::from_str(&v).unwrap_or_else(|_| HeaderValue::from_static("results_session=; Path=/"))
    }

    pub fn clear_cookie(&self) -> HeaderValue {
        let secure = if self.secure_cookie { "; Secure" } else { "" };
        let v = format!("{}=deleted; Expires=Thu, 01 Jan 1970 00:00:00 GMT; Max-Age=0; HttpOnly; SameSite=Lax; Path=/{}", SESSION_COOKIE, secure);
        HeaderValue::from_str(&v).unwrap_or_else(|_| HeaderValue::from_static("results_session=; Path=/"))
    }
}
