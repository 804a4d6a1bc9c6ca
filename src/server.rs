//!
//! result_store HTTP server
//! ------------------------
//! Axum router binding the store and the authorization contract to routes.
//!
//! Responsibilities:
//! - Ingestion (`POST /data`) through the atomic writer.
//! - Listing, single-file retrieval and zip export, gated on `read:results`.
//! - Login/callback/logout against the identity authority, with server-side sessions.
//!
//! Handlers never branch on the auth scheme: each protected route asks the configured
//! `Authorizer` chain for a capability and maps the decision to 401/403.

use std::sync::Arc;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::{AuthMode, ServerConfig};
use crate::error::{AppError, AppResult};
use crate::identity::{
    AuthProvider, Authorizer, Decision, JwksVerifier, KeySetCache, OAuthProvider, OAuthSettings, RequestContext,
    SessionError, SessionManager, Strategy, READ_RESULTS,
};
use crate::security::SharedSecret;
use crate::storage::{parse_timestamp, FileRecord, FilterSpec, SortKey, SortOrder, Store, DEFAULT_MAX_FILES};

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub authorizer: Arc<Authorizer>,
    pub sessions: SessionManager,
    /// Present when login endpoints are enabled.
    pub provider: Option<Arc<dyn AuthProvider>>,
}

impl AppState {
    pub fn new(store: Store, authorizer: Authorizer, sessions: SessionManager) -> Self {
        Self { store, authorizer: Arc::new(authorizer), sessions, provider: None }
    }

    pub fn with_provider(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.provider = Some(provider);
        self
    }
}

/// Wire the store, the strategy chain and the login provider from configuration.
///
/// Bearer and id-token verification share one key-set cache so the authority's keys are
/// fetched at most once per process.
pub fn build_state(cfg: &ServerConfig) -> anyhow::Result<AppState> {
    let http = reqwest::Client::builder()
        .timeout(cfg.auth_timeout)
        .build()
        .context("building identity http client")?;
    let keys = cfg
        .identity
        .as_ref()
        .map(|id| Arc::new(KeySetCache::new(KeySetCache::url_for_domain(&id.domain), http.clone())));

    let mut strategies = Vec::new();
    for mode in &cfg.auth_modes {
        match mode {
            AuthMode::Basic => {
                if cfg.shared_secret.is_none() {
                    warn!(target: "auth", "no shared secret configured; results are readable without credentials");
                }
                strategies.push(Strategy::SharedSecret(cfg.shared_secret.as_deref().map(SharedSecret::parse)));
            }
            AuthMode::Session => strategies.push(Strategy::Session),
            AuthMode::Bearer => {
                let (Some(id), Some(keys)) = (cfg.identity.as_ref(), keys.clone()) else {
                    anyhow::bail!("bearer auth requires AUTH0_DOMAIN");
                };
                let audience = id.audience.clone().context("bearer auth requires AUTH0_AUDIENCE")?;
                let verifier = JwksVerifier::new(keys, audience, JwksVerifier::issuer_for_domain(&id.domain))
                    .with_timeout(cfg.auth_timeout);
                strategies.push(Strategy::BearerScope(Arc::new(verifier)));
            }
        }
    }
    info!(
        target: "auth",
        "authorization chain: [{}]",
        strategies.iter().map(|s| s.name()).collect::<Vec<_>>().join(", ")
    );

    let sessions = SessionManager::new(cfg.session_key.clone(), cfg.session_ttl).with_secure_cookie(cfg.cookie_secure);
    let mut state = AppState::new(Store::new(&cfg.upload_dir), Authorizer::new(strategies), sessions);

    if let (Some(id), Some(keys)) = (cfg.identity.as_ref(), keys) {
        if let (Some(client_id), Some(client_secret)) = (id.client_id.clone(), id.client_secret.clone()) {
            let id_tokens = JwksVerifier::new(keys, client_id.clone(), JwksVerifier::issuer_for_domain(&id.domain))
                .with_timeout(cfg.auth_timeout);
            let return_to = id
                .callback_url
                .strip_suffix("/callback")
                .map(|base| format!("{base}/"))
                .unwrap_or_else(|| "/".to_string());
            let settings = OAuthSettings {
                domain: id.domain.clone(),
                client_id,
                client_secret,
                callback_url: id.callback_url.clone(),
                audience: id.audience.clone(),
                return_to,
            };
            state = state.with_provider(Arc::new(OAuthProvider::new(settings, http, Arc::new(id_tokens), cfg.auth_timeout)));
        }
    }
    Ok(state)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/data", post(submit))
        .route("/api/uploads", get(list_uploads))
        .route("/api/results/list", get(list_results))
        .route("/api/results/file/{*name}", get(fetch_file))
        .route("/api/results/zip", get(export_zip))
        .route("/login", get(login))
        .route("/callback", get(callback))
        .route("/logout", get(logout))
        .route("/api/me", get(me))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn run(cfg: ServerConfig) -> anyhow::Result<()> {
    let state = build_state(&cfg)?;
    state
        .store
        .ensure_root()
        .with_context(|| format!("Failed to create or access upload dir: {}", cfg.upload_dir.display()))?;
    let listener = tokio::net::TcpListener::bind((cfg.bind.as_str(), cfg.http_port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", cfg.bind, cfg.http_port))?;
    info!(
        target: "startup",
        "result store listening on {}:{} (upload_dir={:?}, login={})",
        cfg.bind,
        cfg.http_port,
        cfg.upload_dir,
        state.provider.is_some()
    );
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn require(state: &AppState, headers: &HeaderMap, capability: &str) -> AppResult<()> {
    let ctx = RequestContext::from_headers(headers, &state.sessions);
    match state.authorizer.authorize(&ctx, capability).await {
        Decision::Granted { via, subject } => {
            debug!(target: "auth", "granted capability={} via={} subject={:?}", capability, via, subject);
            Ok(())
        }
        Decision::Denied(denial) => Err(AppError::from_denial(denial, state.authorizer.challenge())),
    }
}

fn join_error(e: tokio::task::JoinError) -> AppError {
    AppError::from(anyhow::anyhow!("blocking task failed: {e}"))
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn submit(State(state): State<AppState>, body: Bytes) -> AppResult<Json<Value>> {
    let payload: Map<String, Value> = match serde_json::from_slice(&body) {
        Ok(Value::Object(map)) => map,
        _ => return Err(AppError::user("invalid_json", "invalid JSON")),
    };
    let store = state.store.clone();
    let saved = tokio::task::spawn_blocking(move || store.write_submission(&payload))
        .await
        .map_err(join_error)?
        .map_err(|e| {
            error!(target: "store", "write failed: {e}");
            AppError::from(e)
        })?;
    Ok(Json(json!({"status": "ok", "saved": saved.to_string_lossy()})))
}

/// Query string shared by the listing and export endpoints. Everything arrives as text
/// so malformed numbers become a 400 with our own error body.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub pattern: Option<String>,
    pub ext: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
    pub min_size: Option<String>,
    pub max_size: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub format: Option<String>,
    pub max_files: Option<String>,
}

fn present(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn invalid_param(name: &str) -> AppError {
    AppError::user("invalid_query".to_string(), format!("invalid {name}"))
}

fn number<T: std::str::FromStr>(v: &Option<String>, name: &str) -> AppResult<Option<T>> {
    present(v).map(|s| s.parse::<T>().map_err(|_| invalid_param(name))).transpose()
}

impl ListQuery {
    pub fn filter_spec(&self) -> AppResult<FilterSpec> {
        let mut spec = FilterSpec::default();
        if let Some(p) = present(&self.pattern) {
            spec.pattern = Some(glob::Pattern::new(p).map_err(|_| invalid_param("pattern"))?);
        }
        spec.ext = present(&self.ext).map(str::to_string);
        if let Some(s) = present(&self.sort) { spec.sort = SortKey::parse(s); }
        if let Some(o) = present(&self.order) { spec.order = SortOrder::parse(o); }
        if let Some(n) = number(&self.limit, "limit")? { spec.limit = n; }
        if let Some(n) = number(&self.offset, "offset")? { spec.offset = n; }
        if let Some(n) = number(&self.min_size, "min_size")? { spec.min_size = n; }
        spec.max_size = number(&self.max_size, "max_size")?;
        spec.since = present(&self.since).map(|s| parse_timestamp(s).ok_or_else(|| invalid_param("since"))).transpose()?;
        spec.until = present(&self.until).map(|s| parse_timestamp(s).ok_or_else(|| invalid_param("until"))).transpose()?;
        Ok(spec)
    }

    pub fn max_files(&self) -> AppResult<usize> {
        Ok(number(&self.max_files, "max_files")?.unwrap_or(DEFAULT_MAX_FILES))
    }

    fn wants_html(&self) -> bool {
        present(&self.format).map(|f| f.eq_ignore_ascii_case("html")).unwrap_or(false)
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn render_table(files: &[FileRecord]) -> String {
    let mut html = String::from("<!doctype html>\n<table>\n<tr><th>name</th><th>size</th><th>mtime</th></tr>\n");
    for f in files {
        html.push_str(&format!(
            "<tr><td><a href=\"{}\">{}</a></td><td>{}</td><td>{}</td></tr>\n",
            escape_html(&f.url),
            escape_html(&f.name),
            f.size,
            f.mtime_display()
        ));
    }
    html.push_str("</table>\n");
    html
}

async fn list_files(state: &AppState, q: &ListQuery) -> AppResult<Response> {
    let spec = q.filter_spec()?;
    let store = state.store.clone();
    let files = tokio::task::spawn_blocking(move || store.list(&spec)).await.map_err(join_error)?;
    if q.wants_html() {
        return Ok(Html(render_table(&files)).into_response());
    }
    Ok(Json(json!({"count": files.len(), "files": files})).into_response())
}

async fn list_uploads(State(state): State<AppState>, Query(q): Query<ListQuery>) -> AppResult<Response> {
    list_files(&state, &q).await
}

async fn list_results(State(state): State<AppState>, headers: HeaderMap, Query(q): Query<ListQuery>) -> AppResult<Response> {
    require(&state, &headers, READ_RESULTS).await?;
    list_files(&state, &q).await
}

async fn fetch_file(State(state): State<AppState>, headers: HeaderMap, Path(name): Path<String>) -> AppResult<Response> {
    require(&state, &headers, READ_RESULTS).await?;
    let store = state.store.clone();
    let bytes = tokio::task::spawn_blocking(move || -> AppResult<Vec<u8>> {
        // resolve canonicalizes the root, so it has to exist for a clean 404
        store.ensure_root().map_err(crate::storage::StoreError::from)?;
        let path = store.resolve(&name)?;
        if !name.ends_with(".json") {
            return Err(AppError::user("invalid_name", "invalid name"));
        }
        if !path.is_file() {
            return Err(AppError::not_found("not_found", "file not found"));
        }
        std::fs::read(&path).map_err(|e| AppError::from(crate::storage::StoreError::from(e)))
    })
    .await
    .map_err(join_error)??;
    Ok(([(header::CONTENT_TYPE, "application/json")], bytes).into_response())
}

async fn export_zip(State(state): State<AppState>, headers: HeaderMap, Query(q): Query<ListQuery>) -> AppResult<Response> {
    require(&state, &headers, READ_RESULTS).await?;
    let mut spec = q.filter_spec()?;
    let max_files = q.max_files()?;
    // without an explicit limit the archive is bounded by max_files alone
    if present(&q.limit).is_none() {
        spec.limit = max_files;
    }
    let store = state.store.clone();
    let archive = tokio::task::spawn_blocking(move || store.build_archive(&spec, max_files))
        .await
        .map_err(join_error)??;
    let disposition = format!("attachment; filename=\"results-{}.zip\"", Utc::now().format("%Y%m%d-%H%M%S"));
    Ok((
        [(header::CONTENT_TYPE, "application/zip".to_string()), (header::CONTENT_DISPOSITION, disposition)],
        archive.bytes,
    )
        .into_response())
}

fn redirect(location: &str, cookie: HeaderValue) -> AppResult<Response> {
    let mut headers = HeaderMap::new();
    let loc = HeaderValue::from_str(location).map_err(|_| AppError::internal("bad_redirect", "invalid redirect target"))?;
    headers.insert(header::LOCATION, loc);
    headers.insert(header::SET_COOKIE, cookie);
    Ok((StatusCode::FOUND, headers).into_response())
}

fn provider(state: &AppState) -> AppResult<Arc<dyn AuthProvider>> {
    state.provider.clone().ok_or_else(|| AppError::not_found("login_disabled", "login is not configured"))
}

fn session_failure(e: SessionError) -> AppError {
    error!(target: "auth", "cannot create session: {e}");
    AppError::internal("session_error", "could not create session")
}

async fn login(State(state): State<AppState>) -> AppResult<Response> {
    let provider = provider(&state)?;
    let pending = state.sessions.begin_login().map_err(session_failure)?;
    let url = provider.authorize_url(&pending.state, &pending.nonce);
    redirect(&url, state.sessions.session_cookie(&pending.session_id))
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

async fn callback(State(state): State<AppState>, headers: HeaderMap, Query(q): Query<CallbackQuery>) -> AppResult<Response> {
    let provider = provider(&state)?;
    let sid = state
        .sessions
        .session_id_from_headers(&headers)
        .ok_or_else(|| AppError::csrf("invalid_state", "invalid state"))?;
    let returned = q.state.as_deref().unwrap_or_default();
    let nonce = state.sessions.take_pending(&sid, returned).map_err(|e| {
        warn!(target: "auth", "login callback rejected: {e}");
        AppError::csrf("invalid_state", "invalid state")
    })?;
    if let Some(err) = &q.error {
        warn!(target: "auth", "authority returned error: {err}");
        return Err(AppError::auth("login_failed", "login failed"));
    }
    let code = q.code.as_deref().filter(|c| !c.is_empty()).ok_or_else(|| AppError::user("missing_code", "missing code"))?;
    let outcome = provider
        .complete_login(code, &nonce)
        .await
        .map_err(|e| {
            warn!(target: "auth", "login failed: {e}");
            AppError::auth("login_failed", "login failed")
        })?;
    let session = state.sessions.establish(outcome.principal, outcome.access_token).map_err(session_failure)?;
    redirect("/", state.sessions.session_cookie(&session.session_id))
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Response> {
    if let Some(sid) = state.sessions.session_id_from_headers(&headers) {
        if state.sessions.logout(&sid) {
            info!(target: "auth", "session logged out");
        }
    }
    let target = state.provider.as_ref().and_then(|p| p.logout_url()).unwrap_or_else(|| "/".to_string());
    redirect(&target, state.sessions.clear_cookie())
}

async fn me(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    let session = state.sessions.from_headers(&headers).ok_or_else(|| AppError::auth("unauthorized", "unauthorized"))?;
    Ok(Json(json!({
        "user": session.principal(),
        "has_access_token": session.access_token().is_some(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(pairs: &[(&str, &str)]) -> ListQuery {
        let mut q = ListQuery::default();
        for (k, v) in pairs {
            let v = Some(v.to_string());
            match *k {
                "pattern" => q.pattern = v,
                "limit" => q.limit = v,
                "since" => q.since = v,
                "sort" => q.sort = v,
                "max_files" => q.max_files = v,
                "format" => q.format = v,
                _ => unreachable!(),
            }
        }
        q
    }

    #[test]
    fn query_defaults_and_blank_values() {
        let spec = q(&[("limit", ""), ("sort", " ")]).filter_spec().unwrap();
        assert_eq!(spec, FilterSpec::default());
        assert_eq!(q(&[]).max_files().unwrap(), DEFAULT_MAX_FILES);
    }

    #[test]
    fn query_rejects_malformed_values() {
        assert_eq!(q(&[("limit", "ten")]).filter_spec().unwrap_err().http_status(), 400);
        assert_eq!(q(&[("pattern", "[")]).filter_spec().unwrap_err().http_status(), 400);
        assert_eq!(q(&[("since", "yesterday")]).filter_spec().unwrap_err().http_status(), 400);
        assert_eq!(q(&[("max_files", "-1")]).max_files().unwrap_err().http_status(), 400);
    }

    #[test]
    fn html_format_is_case_insensitive_and_escaped() {
        assert!(q(&[("format", "HTML")]).wants_html());
        let rec = FileRecord {
            name: "<b>.json".into(),
            size: 3,
            mtime: Utc::now(),
            url: "/api/results/file/%3Cb%3E.json".into(),
        };
        let html = render_table(&[rec]);
        assert!(html.contains("&lt;b&gt;.json"));
        assert!(!html.contains("<b>"));
    }
}
