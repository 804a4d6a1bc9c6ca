//! Session login integration tests: /login -> /callback -> session-gated reads -> /logout,
//! against a stub identity authority.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::tempdir;
use tower::ServiceExt;

use result_store::identity::{AuthError, AuthProvider, Authorizer, LoginOutcome, Principal, SessionManager, Strategy};
use result_store::server::{router, AppState};
use result_store::storage::Store;

struct StubAuthority;

#[async_trait]
impl AuthProvider for StubAuthority {
    fn authorize_url(&self, state: &str, nonce: &str) -> String {
        format!("https://tenant.example/authorize?state={state}&nonce={nonce}")
    }

    async fn complete_login(&self, code: &str, _nonce: &str) -> Result<LoginOutcome, AuthError> {
        if code != "good-code" {
            return Err(AuthError::Exchange("invalid_grant".into()));
        }
        Ok(LoginOutcome {
            principal: Principal { sub: "auth0|ada".into(), name: Some("Ada".into()), email: Some("ada@example.org".into()) },
            access_token: None,
        })
    }

    fn logout_url(&self) -> Option<String> {
        Some("https://tenant.example/v2/logout?client_id=c".into())
    }
}

fn app(store: &Store) -> Router {
    let sessions = SessionManager::new(b"login-flow-key".to_vec(), Duration::from_secs(300)).with_secure_cookie(false);
    let state = AppState::new(store.clone(), Authorizer::new(vec![Strategy::Session]), sessions)
        .with_provider(Arc::new(StubAuthority));
    router(state)
}

async fn get(app: &Router, uri: &str, cookie: Option<&str>) -> (StatusCode, HeaderMap, Bytes) {
    let mut req = Request::get(uri);
    if let Some(c) = cookie {
        req = req.header(header::COOKIE, c);
    }
    let resp = app.clone().oneshot(req.body(Body::empty()).unwrap()).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    (status, headers, resp.into_body().collect().await.unwrap().to_bytes())
}

/// `name=value` part of the Set-Cookie header.
fn cookie_pair(headers: &HeaderMap) -> String {
    let raw = headers[header::SET_COOKIE].to_str().unwrap();
    raw.split(';').next().unwrap().to_string()
}

fn query_param(url: &str, key: &str) -> String {
    let query = url.split_once('?').unwrap().1;
    query
        .split('&')
        .find_map(|kv| kv.strip_prefix(&format!("{key}=")))
        .unwrap()
        .to_string()
}

async fn start_login(app: &Router) -> (String, String) {
    let (status, headers, _) = get(app, "/login", None).await;
    assert_eq!(status, StatusCode::FOUND);
    let location = headers[header::LOCATION].to_str().unwrap().to_string();
    assert!(location.starts_with("https://tenant.example/authorize?"));
    let set_cookie = headers[header::SET_COOKIE].to_str().unwrap();
    assert!(set_cookie.contains("HttpOnly") && set_cookie.contains("SameSite=Lax") && !set_cookie.contains("Secure"));
    (cookie_pair(&headers), query_param(&location, "state"))
}

#[tokio::test]
async fn full_login_flow_grants_session_reads() {
    let tmp = tempdir().unwrap();
    let store = Store::new(tmp.path());
    let app = app(&store);

    let (status, _, _) = get(&app, "/api/results/list", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (pending_cookie, state) = start_login(&app).await;
    // a pending login is not a session
    let (status, _, _) = get(&app, "/api/me", Some(&pending_cookie)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, headers, _) = get(&app, &format!("/callback?code=good-code&state={state}"), Some(&pending_cookie)).await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(headers[header::LOCATION], "/");
    let session_cookie = cookie_pair(&headers);
    assert_ne!(session_cookie, pending_cookie);

    let (status, _, bytes) = get(&app, "/api/me", Some(&session_cookie)).await;
    assert_eq!(status, StatusCode::OK);
    let me: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(me, json!({
        "user": {"sub": "auth0|ada", "name": "Ada", "email": "ada@example.org"},
        "has_access_token": false
    }));

    let (status, _, _) = get(&app, "/api/results/list", Some(&session_cookie)).await;
    assert_eq!(status, StatusCode::OK);

    // the pending entry was consumed
    let (status, _, _) = get(&app, &format!("/callback?code=good-code&state={state}"), Some(&pending_cookie)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, headers, _) = get(&app, "/logout", Some(&session_cookie)).await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(headers[header::LOCATION], "https://tenant.example/v2/logout?client_id=c");
    assert!(headers[header::SET_COOKIE].to_str().unwrap().contains("Max-Age=0"));

    let (status, _, _) = get(&app, "/api/me", Some(&session_cookie)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _, _) = get(&app, "/api/results/list", Some(&session_cookie)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn callback_rejects_forged_state_and_failed_exchange() {
    let tmp = tempdir().unwrap();
    let store = Store::new(tmp.path());
    let app = app(&store);

    let (cookie, _) = start_login(&app).await;
    let (status, _, bytes) = get(&app, "/callback?code=good-code&state=forged", Some(&cookie)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let v: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(v["error"], "invalid_state");

    let (status, _, _) = get(&app, "/callback?code=good-code&state=x", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (cookie, state) = start_login(&app).await;
    let (status, headers, _) = get(&app, &format!("/callback?code=bad-code&state={state}"), Some(&cookie)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(headers.get(header::SET_COOKIE).is_none());
}

#[tokio::test]
async fn login_routes_are_absent_without_a_provider() {
    let tmp = tempdir().unwrap();
    let store = Store::new(tmp.path());
    let sessions = SessionManager::new(b"k".to_vec(), Duration::from_secs(60));
    let app = router(AppState::new(store, Authorizer::new(vec![Strategy::Session]), sessions));

    let (status, _, _) = get(&app, "/login", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    // logout still clears the cookie and goes home
    let (status, headers, _) = get(&app, "/logout", None).await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(headers[header::LOCATION], "/");
}
