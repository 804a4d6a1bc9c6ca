//! Identity, sessions and the authorization contract.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod session;
mod jwks;
mod verifier;
mod provider;
mod request_context;
mod authorizer;

pub use principal::Principal;
pub use session::{parse_cookie, PendingLogin, Session, SessionError, SessionManager, SessionState, SESSION_COOKIE};
pub use jwks::KeySetCache;
pub use verifier::{AuthError, Claims, JwksVerifier, TokenVerifier};
pub use provider::{AuthProvider, LoginOutcome, OAuthProvider, OAuthSettings};
pub use request_context::RequestContext;
pub use authorizer::{Authorizer, Decision, Denial, Strategy, READ_RESULTS};
