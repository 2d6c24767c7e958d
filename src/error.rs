//! Server error taxonomy and its HTTP mapping.
//!
//! Every failure that can reach a client is translated into one of these
//! kinds before it leaves the core; the HTTP layer only maps kind to
//! status code and body shape. Success and error bodies never share
//! shapes: errors are always `{"error":{"kind","message","details?"}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("page not found: {0}")]
    PageNotFound(String),

    #[error("page closed by backend: {0}")]
    PageGone(String),

    #[error("unsupported browser kind: {0}")]
    InvalidBrowserKind(String),

    #[error("bad argument `{field}`: {message}")]
    BadArguments { field: String, message: String },

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("cannot parse command line at offset {offset}: {reason}")]
    UnparsableLine { reason: String, offset: usize },

    #[error("{0}")]
    CapacityExceeded(String),

    #[error("{0}")]
    Timeout(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("navigation interrupted: {0}")]
    NavigationInterrupted(String),

    #[error("backend launch failed: {0}")]
    BackendLaunchFailed(String),

    #[error("{0}")]
    BackendError(String),

    #[error("vision model overloaded: {0}")]
    VisionOverloaded(String),

    #[error("vision model rejected credentials: {0}")]
    VisionAuth(String),

    #[error("no parseable coordinate arrays in vision response")]
    VisionMalformed,

    #[error("missing or invalid bearer token")]
    Unauthorized,
}

impl ServerError {
    pub fn bad_arguments(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BadArguments {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Stable kind string used in the error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) => "SessionNotFound",
            Self::PageNotFound(_) => "PageNotFound",
            Self::PageGone(_) => "PageGone",
            Self::InvalidBrowserKind(_) => "InvalidBrowserKind",
            Self::BadArguments { .. } => "BadArguments",
            Self::UnknownCommand(_) => "UnknownCommand",
            Self::UnparsableLine { .. } => "UnparsableLine",
            Self::CapacityExceeded(_) => "CapacityExceeded",
            Self::Timeout(_) => "Timeout",
            Self::ElementNotFound(_) => "ElementNotFound",
            Self::NavigationInterrupted(_) => "NavigationInterrupted",
            Self::BackendLaunchFailed(_) => "BackendLaunchFailed",
            Self::BackendError(_) => "BackendError",
            Self::VisionOverloaded(_) => "VisionOverloaded",
            Self::VisionAuth(_) => "VisionAuth",
            Self::VisionMalformed => "VisionMalformed",
            Self::Unauthorized => "Unauthorized",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::SessionNotFound(_) | Self::PageNotFound(_) => StatusCode::NOT_FOUND,
            Self::PageGone(_) => StatusCode::GONE,
            Self::InvalidBrowserKind(_)
            | Self::BadArguments { .. }
            | Self::UnknownCommand(_)
            | Self::UnparsableLine { .. } => StatusCode::BAD_REQUEST,
            Self::CapacityExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::ElementNotFound(_) | Self::NavigationInterrupted(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::BackendLaunchFailed(_) | Self::BackendError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::VisionOverloaded(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::VisionAuth(_) | Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::VisionMalformed => StatusCode::BAD_GATEWAY,
        }
    }

    /// Optional structured detail carried alongside the message.
    fn details(&self) -> Option<Value> {
        match self {
            Self::BadArguments { field, .. } => Some(json!({ "field": field })),
            Self::UnparsableLine { offset, .. } => Some(json!({ "offset": offset })),
            _ => None,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let mut error = json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        if let Some(details) = self.details() {
            error["details"] = details;
        }
        (self.status(), Json(json!({ "error": error }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_spec_status_codes() {
        let cases = [
            (ServerError::SessionNotFound("x".into()), 404),
            (ServerError::PageNotFound("x".into()), 404),
            (ServerError::PageGone("x".into()), 410),
            (ServerError::InvalidBrowserKind("opera".into()), 400),
            (ServerError::bad_arguments("selector", "missing"), 400),
            (ServerError::UnknownCommand("dance".into()), 400),
            (
                ServerError::UnparsableLine {
                    reason: "bad".into(),
                    offset: 3,
                },
                400,
            ),
            (ServerError::CapacityExceeded("sessions".into()), 429),
            (
                ServerError::Timeout("command timed out after 30s".into()),
                504,
            ),
            (ServerError::ElementNotFound("#x".into()), 422),
            (ServerError::NavigationInterrupted("aborted".into()), 422),
            (ServerError::BackendLaunchFailed("no chrome".into()), 500),
            (ServerError::BackendError("boom".into()), 500),
            (ServerError::VisionOverloaded("503".into()), 503),
            (ServerError::VisionAuth("bad key".into()), 401),
            (ServerError::VisionMalformed, 502),
        ];
        for (err, code) in cases {
            assert_eq!(err.status().as_u16(), code, "kind {}", err.kind());
        }
    }

    #[test]
    fn bad_arguments_names_the_field() {
        let err = ServerError::bad_arguments("url", "expected a string");
        assert_eq!(err.kind(), "BadArguments");
        assert!(err.to_string().contains("url"));
        assert_eq!(err.details(), Some(json!({ "field": "url" })));
    }
}
