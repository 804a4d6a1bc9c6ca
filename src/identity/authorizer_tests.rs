use super::*;
use crate::identity::verifier::test_support::{claims_with, mint, verifier};
use crate::identity::Principal;
use crate::security::BasicCredentials;

fn basic(password: &str) -> RequestContext {
    RequestContext {
        basic: Some(BasicCredentials { username: "ignored".into(), password: password.into() }),
        ..Default::default()
    }
}

fn bearer_strategy() -> Strategy {
    Strategy::BearerScope(Arc::new(verifier()))
}

#[tokio::test]
async fn shared_secret_checks_password_only() {
    let s = Strategy::SharedSecret(Some(SharedSecret::parse("lab")));
    assert!(s.authorize(&basic("lab"), READ_RESULTS).await.is_granted());
    assert_eq!(s.authorize(&basic("nope"), READ_RESULTS).await, Decision::Denied(Denial::Unauthorized));
    assert_eq!(s.authorize(&RequestContext::default(), READ_RESULTS).await, Decision::Denied(Denial::Unauthorized));
}

#[tokio::test]
async fn shared_secret_open_mode_grants_everything() {
    let s = Strategy::SharedSecret(None);
    assert!(s.authorize(&RequestContext::default(), READ_RESULTS).await.is_granted());
}

#[tokio::test]
async fn session_grants_on_identity_alone() {
    let ctx = RequestContext { principal: Some(Principal { sub: "u1".into(), ..Default::default() }), ..Default::default() };
    assert_eq!(
        Strategy::Session.authorize(&ctx, "anything:at-all").await,
        Decision::Granted { via: "session", subject: Some("u1".into()) }
    );
    assert!(!Strategy::Session.authorize(&RequestContext::default(), READ_RESULTS).await.is_granted());
}

#[tokio::test]
async fn bearer_requires_the_named_capability() {
    let s = bearer_strategy();
    let ok = RequestContext { bearer: Some(mint(claims_with(&["read:results"]))), ..Default::default() };
    assert!(s.authorize(&ok, READ_RESULTS).await.is_granted());

    let wrong = RequestContext { bearer: Some(mint(claims_with(&["write:results"]))), ..Default::default() };
    assert_eq!(
        s.authorize(&wrong, READ_RESULTS).await,
        Decision::Denied(Denial::Forbidden { missing_scope: "read:results".into() })
    );

    let garbage = RequestContext { bearer: Some("abc.def.ghi".into()), ..Default::default() };
    assert_eq!(s.authorize(&garbage, READ_RESULTS).await, Decision::Denied(Denial::Unauthorized));
    assert_eq!(s.authorize(&RequestContext::default(), READ_RESULTS).await, Decision::Denied(Denial::Unauthorized));
}

#[tokio::test]
async fn bearer_falls_back_to_session_token() {
    let ctx = RequestContext { session_token: Some(mint(claims_with(&["read:results"]))), ..Default::default() };
    assert!(bearer_strategy().authorize(&ctx, READ_RESULTS).await.is_granted());
}

#[tokio::test]
async fn chain_first_grant_wins_and_forbidden_outranks_unauthorized() {
    let chain = Authorizer::new(vec![Strategy::SharedSecret(Some(SharedSecret::parse("lab"))), bearer_strategy()]);

    assert!(chain.authorize(&basic("lab"), READ_RESULTS).await.is_granted());

    let under_scoped = RequestContext { bearer: Some(mint(claims_with(&["write:results"]))), ..Default::default() };
    assert_eq!(
        chain.authorize(&under_scoped, READ_RESULTS).await,
        Decision::Denied(Denial::Forbidden { missing_scope: "read:results".into() })
    );
    assert_eq!(chain.authorize(&RequestContext::default(), READ_RESULTS).await, Decision::Denied(Denial::Unauthorized));
    assert_eq!(chain.challenge(), "Basic realm=\"results\"");
}

#[tokio::test]
async fn empty_chain_denies() {
    let chain = Authorizer::default();
    assert_eq!(chain.authorize(&basic("x"), READ_RESULTS).await, Decision::Denied(Denial::Unauthorized));
    assert_eq!(chain.challenge(), "Bearer");
}
