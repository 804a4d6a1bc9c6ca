use axum::http::HeaderMap;

use super::principal::Principal;
use super::session::SessionManager;
use crate::security::{parse_basic_auth, parse_bearer, BasicCredentials};

/// Credentials a single request carries, gathered once and handed to every strategy.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub basic: Option<BasicCredentials>,
    pub bearer: Option<String>,
    /// Principal of the authenticated session, if the cookie names one.
    pub principal: Option<Principal>,
    /// Access token stored in that session by the login callback.
    pub session_token: Option<String>,
}

impl RequestContext {
    pub fn from_headers(headers: &HeaderMap, sessions: &SessionManager) -> Self {
        let session = sessions.from_headers(headers);
        Self {
            basic: parse_basic_auth(headers),
            bearer: parse_bearer(headers),
            principal: session.as_ref().and_then(|s| s.principal().cloned()),
            session_token: session.as_ref().and_then(|s| s.access_token().map(str::to_string)),
        }
    }
}
