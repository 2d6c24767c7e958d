//! API request and response types.

use crate::logs::{ConsoleEvent, NetworkDirection, NetworkEvent};
use crate::overlay::OverlayMode;
use crate::sessions::SessionSummary;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn default_browser_type() -> String {
    "chromium".to_string()
}

fn default_true() -> bool {
    true
}

fn default_console_limit() -> usize {
    100
}

fn default_network_limit() -> usize {
    100
}

fn default_errors_limit() -> usize {
    50
}

/// Request to create a browser session.
#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default = "default_browser_type")]
    pub browser_type: String,
    #[serde(default = "default_true")]
    pub headless: bool,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub status: &'static str,
    pub headless: bool,
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionSummary>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct ClosedResponse {
    pub status: &'static str,
}

/// Query string for page creation (`?url=...`).
#[derive(Debug, Deserialize)]
pub struct CreatePageQuery {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreatePageResponse {
    pub page_id: String,
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct PageUrlResponse {
    pub url: String,
    pub title: String,
}

/// Structured command body: `{command, args, kwargs}`.
#[derive(Debug, Deserialize)]
pub struct StructuredCommandRequest {
    pub command: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

/// One-line command body for `POST /command`.
#[derive(Debug, Deserialize)]
pub struct LineCommandRequest {
    pub session_id: String,
    pub page_id: String,
    pub command: String,
}

#[derive(Debug, Serialize)]
pub struct LineCommandResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

impl LineCommandResponse {
    pub fn success() -> Self {
        Self {
            status: "success",
            message: None,
            url: None,
            result: None,
            screenshot: None,
        }
    }
}

/// Console log query. `types` may repeat (`?types=error&types=warning`).
#[derive(Debug, Deserialize)]
pub struct ConsoleQuery {
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub since: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub until: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default = "default_console_limit")]
    pub limit: usize,
    #[serde(default)]
    pub text_contains: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NetworkQuery {
    #[serde(default)]
    pub since: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default = "default_network_limit")]
    pub limit: usize,
}

#[derive(Debug, Deserialize)]
pub struct ErrorsQuery {
    #[serde(default = "default_errors_limit")]
    pub limit: usize,
}

/// One console log line on the wire.
#[derive(Debug, Serialize)]
pub struct ConsoleRecord {
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub args: Vec<Value>,
}

impl From<&ConsoleEvent> for ConsoleRecord {
    fn from(event: &ConsoleEvent) -> Self {
        Self {
            timestamp: event.ts.to_rfc3339(),
            kind: event.kind.as_str().to_string(),
            text: event.text.clone(),
            location: event.location.clone(),
            args: event.args.clone(),
        }
    }
}

/// One network log line on the wire. Failed requests are reported with
/// `type: "request"` plus a `failure` string, the shape clients already
/// parse.
#[derive(Debug, Serialize)]
pub struct NetworkRecord {
    pub timestamp: String,
    pub method: String,
    pub url: String,
    #[serde(rename = "type")]
    pub direction: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl From<&NetworkEvent> for NetworkRecord {
    fn from(event: &NetworkEvent) -> Self {
        Self {
            timestamp: event.ts.to_rfc3339(),
            method: event.method.clone(),
            url: event.url.clone(),
            direction: match event.direction {
                NetworkDirection::Request | NetworkDirection::Failed => "request",
                NetworkDirection::Response => "response",
            },
            status: event.status,
            failure: event.failure.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConsoleLogsResponse {
    pub page_id: String,
    pub logs: Vec<ConsoleRecord>,
    pub count: usize,
    pub total_captured: usize,
}

#[derive(Debug, Serialize)]
pub struct NetworkLogsResponse {
    pub page_id: String,
    pub logs: Vec<NetworkRecord>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorLogsResponse {
    pub page_id: String,
    pub errors: Vec<ConsoleRecord>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct ScreenshotResponse {
    pub status: &'static str,
    pub screenshot: String,
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct NavigateRequest {
    pub session_id: String,
    pub page_id: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct NavigateResponse {
    pub status: &'static str,
    pub url: String,
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct BoundingBoxRequest {
    pub screenshot: String,
    pub api_key: String,
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BoundingBoxResponse {
    pub status: &'static str,
    pub raw_response: String,
    pub coordinates: Vec<[i64; 4]>,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct VisualizeRequest {
    pub screenshot: String,
    pub bounding_boxes: Vec<[i64; 4]>,
    #[serde(default)]
    pub mode: OverlayMode,
}

#[derive(Debug, Serialize)]
pub struct VisualizeResponse {
    pub status: &'static str,
    pub visualized_image: String,
    pub mode: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub sessions: usize,
    pub pages: usize,
    pub version: &'static str,
}
