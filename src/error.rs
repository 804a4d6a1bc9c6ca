//! Unified application error model and mapping helpers.
//! Storage and authorization layers keep their own typed errors; this enum is what the
//! HTTP frontend turns into status codes and JSON bodies.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::identity::Denial;
use crate::storage::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    UserInput { code: String, message: String },
    NotFound { code: String, message: String },
    Auth {
        code: String,
        message: String,
        #[serde(default)]
        challenge: Option<String>,
    },
    Forbidden {
        code: String,
        message: String,
        #[serde(default)]
        missing_scope: Option<String>,
    },
    Csrf { code: String, message: String },
    Io { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::UserInput { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Auth { code, .. }
            | AppError::Forbidden { code, .. }
            | AppError::Csrf { code, .. }
            | AppError::Io { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::UserInput { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Auth { message, .. }
            | AppError::Forbidden { message, .. }
            | AppError::Csrf { message, .. }
            | AppError::Io { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn user<S: Into<String>>(code: S, msg: S) -> Self { AppError::UserInput { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn auth<S: Into<String>>(code: S, msg: S) -> Self { AppError::Auth { code: code.into(), message: msg.into(), challenge: None } }
    pub fn forbidden<S: Into<String>>(code: S, msg: S) -> Self { AppError::Forbidden { code: code.into(), message: msg.into(), missing_scope: None } }
    pub fn csrf<S: Into<String>>(code: S, msg: S) -> Self { AppError::Csrf { code: code.into(), message: msg.into() } }
    pub fn io<S: Into<String>>(code: S, msg: S) -> Self { AppError::Io { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Attach a `WWW-Authenticate` challenge to an `Auth` error; other variants are returned unchanged.
    pub fn with_challenge(self, scheme: &str) -> Self {
        match self {
            AppError::Auth { code, message, .. } => AppError::Auth { code, message, challenge: Some(scheme.to_string()) },
            other => other,
        }
    }

    /// Convert an authorization denial into the matching 401/403 error.
    pub fn from_denial(denial: Denial, challenge: &str) -> Self {
        match denial {
            Denial::Unauthorized => AppError::auth("unauthorized", "unauthorized").with_challenge(challenge),
            Denial::Forbidden { missing_scope } => AppError::Forbidden {
                code: "forbidden".into(),
                message: "forbidden".into(),
                missing_scope: Some(missing_scope),
            },
        }
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::UserInput { .. } => 400,
            AppError::NotFound { .. } => 404,
            AppError::Auth { .. } => 401,
            AppError::Forbidden { .. } => 403,
            AppError::Csrf { .. } => 403,
            AppError::Io { .. } => 500,
            AppError::Internal { .. } => 500,
        }
    }

    /// JSON body in the `{status:"error", error:..}` shape every endpoint shares.
    pub fn body(&self) -> serde_json::Value {
        let mut body = match self {
            // 401/403 bodies carry the reason tag rather than prose
            AppError::Auth { code, .. } | AppError::Forbidden { code, .. } | AppError::Csrf { code, .. } => {
                serde_json::json!({ "status": "error", "error": code })
            }
            _ => serde_json::json!({ "status": "error", "error": self.message(), "code": self.code_str() }),
        };
        if let AppError::Forbidden { missing_scope: Some(scope), .. } = self {
            body["missing_scope"] = serde_json::Value::String(scope.clone());
        }
        body
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidName => AppError::user("invalid_name", "invalid name"),
            StoreError::PermissionDenied(_) => AppError::io("permission_denied", "permission denied"),
            StoreError::Io(_) => AppError::io("storage_error", "storage error"),
            StoreError::Archive(_) => AppError::internal("archive_error", "archive error"),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("internal error: {err:#}");
        AppError::internal("internal", "internal server error")
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut resp = (status, axum::Json(self.body())).into_response();
        if let AppError::Auth { challenge: Some(scheme), .. } = &self {
            if let Ok(v) = HeaderValue::from_str(scheme) {
                resp.headers_mut().insert(header::WWW_AUTHENTICATE, v);
            }
        }
        resp
    }
}
