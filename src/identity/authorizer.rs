use std::sync::Arc;

use tracing::debug;

use super::request_context::RequestContext;
use super::verifier::TokenVerifier;
use crate::security::SharedSecret;

/// Capability gating every read of stored results.
pub const READ_RESULTS: &str = "read:results";

/// Why a request was turned away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    /// No credential, or one that did not verify.
    Unauthorized,
    /// A valid credential without the requested capability.
    Forbidden { missing_scope: String },
}

impl Denial {
    pub fn reason(&self) -> &'static str {
        match self {
            Denial::Unauthorized => "unauthorized",
            Denial::Forbidden { .. } => "forbidden",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Granted { via: &'static str, subject: Option<String> },
    Denied(Denial),
}

impl Decision {
    pub fn is_granted(&self) -> bool { matches!(self, Decision::Granted { .. }) }
}

/// One way of answering "may this request exercise this capability?".
#[derive(Clone)]
pub enum Strategy {
    /// Basic auth, password checked against the secret; username ignored.
    /// `None` is open mode: every request is granted.
    SharedSecret(Option<SharedSecret>),
    /// Any authenticated login session; no per-capability distinction.
    Session,
    /// Bearer token (header, else the session's stored token) that must list the capability.
    BearerScope(Arc<dyn TokenVerifier>),
}

impl std::fmt::Debug for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::SharedSecret(_) => "shared_secret",
            Strategy::Session => "session",
            Strategy::BearerScope(_) => "bearer",
        }
    }

    pub async fn authorize(&self, ctx: &RequestContext, capability: &str) -> Decision {
        match self {
            Strategy::SharedSecret(None) => Decision::Granted { via: self.name(), subject: None },
            Strategy::SharedSecret(Some(secret)) => match &ctx.basic {
                Some(creds) if secret.verify(&creds.password) => Decision::Granted { via: self.name(), subject: None },
                _ => Decision::Denied(Denial::Unauthorized),
            },
            Strategy::Session => match &ctx.principal {
                Some(p) => Decision::Granted { via: self.name(), subject: Some(p.sub.clone()) },
                None => Decision::Denied(Denial::Unauthorized),
            },
            Strategy::BearerScope(verifier) => {
                let Some(token) = ctx.bearer.as_deref().or(ctx.session_token.as_deref()) else {
                    return Decision::Denied(Denial::Unauthorized);
                };
                match verifier.verify(token).await {
                    Ok(claims) if claims.has_capability(capability) => {
                        Decision::Granted { via: self.name(), subject: Some(claims.sub) }
                    }
                    Ok(_) => Decision::Denied(Denial::Forbidden { missing_scope: capability.to_string() }),
                    Err(e) => {
                        debug!(target: "auth", "bearer rejected: {e}");
                        Decision::Denied(Denial::Unauthorized)
                    }
                }
            }
        }
    }
}

/// The configured strategies, tried in order.
///
/// The first grant wins. Without a grant, `forbidden` from any strategy outranks
/// `unauthorized`, so a caller holding a valid but under-scoped token learns which
/// capability is missing. An empty chain denies everything.
#[derive(Debug, Clone, Default)]
pub struct Authorizer {
    strategies: Vec<Strategy>,
}

impl Authorizer {
    pub fn new(strategies: Vec<Strategy>) -> Self { Self { strategies } }

    pub async fn authorize(&self, ctx: &RequestContext, capability: &str) -> Decision {
        let mut denial = Denial::Unauthorized;
        for strategy in &self.strategies {
            match strategy.authorize(ctx, capability).await {
                granted @ Decision::Granted { .. } => return granted,
                Decision::Denied(d @ Denial::Forbidden { .. }) => denial = d,
                Decision::Denied(Denial::Unauthorized) => {}
            }
        }
        debug!(target: "auth", "denied capability={} reason={}", capability, denial.reason());
        Decision::Denied(denial)
    }

    /// `WWW-Authenticate` value for 401 responses.
    pub fn challenge(&self) -> &'static str {
        if self.strategies.iter().any(|s| matches!(s, Strategy::SharedSecret(_))) {
            "Basic realm=\"results\""
        } else {
            "Bearer"
        }
    }
}

#[cfg(test)]
#[path = "authorizer_tests.rs"]
mod authorizer_tests;
