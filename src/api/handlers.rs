//! HTTP request handlers.
//!
//! Each handler is a thin adapter: parse path/query/JSON, call the core,
//! encode the result. No handler holds a registry lock across a driver
//! call; entries are `Arc`-borrowed, executed against, and released.

use super::types::{
    BoundingBoxRequest, BoundingBoxResponse, ClosedResponse, ConsoleLogsResponse, ConsoleQuery,
    ConsoleRecord, CreatePageQuery, CreatePageResponse, CreateSessionRequest,
    CreateSessionResponse, ErrorLogsResponse, ErrorsQuery, HealthResponse, LineCommandRequest,
    LineCommandResponse, NavigateRequest, NavigateResponse, NetworkLogsResponse, NetworkQuery,
    NetworkRecord, PageUrlResponse, ScreenshotResponse, SessionsResponse,
    StructuredCommandRequest, VisualizeRequest, VisualizeResponse,
};
use super::AppState;
use crate::command::line::{parse_line, ParsedLine};
use crate::command::{Command, Outcome};
use crate::driver::{PageHandle, ScreenshotFormat};
use crate::error::ServerError;
use crate::logs::{ConsoleFilter, NetworkFilter};
use crate::overlay;

use axum::extract::{Path, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use axum_extra::extract::Query;
use base64::Engine;
use chrono::Utc;
use serde_json::{json, Value};

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        // Session lifecycle
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/sessions/:sid", delete(close_session))
        .route("/sessions/:sid/pages", post(create_page))
        .route("/sessions/:sid/pages/:pid/url", get(page_url))
        // Pages & commands
        .route("/pages/:pid", delete(close_page))
        .route("/pages/:pid/command", post(structured_command))
        .route("/command", post(line_command))
        // Captured logs
        .route("/pages/:pid/console", get(console_logs))
        .route("/pages/:pid/network", get(network_logs))
        .route("/pages/:pid/errors", get(error_logs))
        // Screenshots & navigation conveniences
        .route("/get_screenshot/:sid/:pid", get(get_screenshot))
        .route("/navigate_to", post(navigate_to))
        // Vision helpers
        .route("/screenshot_to_bounding_boxes", post(bounding_boxes))
        .route("/visualize_bounding_boxes", post(visualize_boxes))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_bearer,
        ));

    Router::new()
        // Liveness stays reachable without credentials.
        .route("/", get(health))
        .merge(protected)
        .with_state(state)
}

/// Bearer check, active only when `API_KEY` is configured.
async fn require_bearer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    if let Some(expected) = &state.config.api_key {
        let presented = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if presented != Some(expected.as_str()) {
            return Err(ServerError::Unauthorized);
        }
    }
    Ok(next.run(request).await)
}

// ============================================================
// Health
// ============================================================

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let (sessions, pages) = state.sessions.counts().await;
    Json(HealthResponse {
        status: "running",
        sessions,
        pages,
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================
// Sessions
// ============================================================

async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<CreateSessionResponse>, ServerError> {
    let session = state
        .sessions
        .create_session(&req.browser_type, req.headless)
        .await?;
    Ok(Json(CreateSessionResponse {
        session_id: session.id.clone(),
        status: "created",
        headless: session.headless,
    }))
}

async fn list_sessions(State(state): State<AppState>) -> Json<SessionsResponse> {
    let sessions = state.sessions.list_sessions().await;
    let count = sessions.len();
    Json(SessionsResponse { sessions, count })
}

async fn close_session(
    State(state): State<AppState>,
    Path(sid): Path<String>,
) -> Result<Json<ClosedResponse>, ServerError> {
    state.sessions.delete_session(&sid).await?;
    Ok(Json(ClosedResponse { status: "closed" }))
}

// ============================================================
// Pages
// ============================================================

async fn create_page(
    State(state): State<AppState>,
    Path(sid): Path<String>,
    Query(query): Query<CreatePageQuery>,
) -> Result<Json<CreatePageResponse>, ServerError> {
    let page_id = state
        .sessions
        .create_page(&sid, query.url.as_deref())
        .await?;
    Ok(Json(CreatePageResponse {
        page_id,
        session_id: sid,
    }))
}

async fn close_page(
    State(state): State<AppState>,
    Path(pid): Path<String>,
) -> Result<Json<ClosedResponse>, ServerError> {
    state.sessions.delete_page(&pid).await?;
    Ok(Json(ClosedResponse { status: "closed" }))
}

async fn page_url(
    State(state): State<AppState>,
    Path((sid, pid)): Path<(String, String)>,
) -> Result<Json<PageUrlResponse>, ServerError> {
    state.sessions.get_session(&sid).await?;
    let entry = state.sessions.registry().lookup(&pid).await?;
    let url = entry
        .handle
        .url()
        .await
        .map_err(|e| crate::command::driver_error(&pid, e))?;
    let title = entry
        .handle
        .title()
        .await
        .map_err(|e| crate::command::driver_error(&pid, e))?;
    Ok(Json(PageUrlResponse { url, title }))
}

// ============================================================
// Commands
// ============================================================

async fn structured_command(
    State(state): State<AppState>,
    Path(pid): Path<String>,
    Json(req): Json<StructuredCommandRequest>,
) -> Result<Json<Value>, ServerError> {
    let (command, timeout) = Command::from_parts(&req.command, &req.args, &req.kwargs)?;
    let outcome = state.dispatcher.execute(&pid, command, timeout).await?;
    Ok(Json(structured_body(&outcome)))
}

fn structured_body(outcome: &Outcome) -> Value {
    match outcome {
        Outcome::Done => json!({ "status": "success" }),
        Outcome::ClickedAt { x, y } => json!({
            "status": "success",
            "message": format!("Clicked at position ({x:?}, {y:?})"),
        }),
        Outcome::Navigated { url } => json!({ "status": "success", "url": url }),
        Outcome::ScreenshotFile { path } => json!({ "status": "success", "path": path }),
        Outcome::ScreenshotInline { base64 } => json!({ "status": "success", "data": base64 }),
        Outcome::Value(value) => json!({ "status": "success", "result": value }),
        Outcome::Info {
            url,
            title,
            viewport,
        } => json!({
            "status": "success",
            "info": { "url": url, "title": title, "viewport": viewport },
        }),
    }
}

async fn line_command(
    State(state): State<AppState>,
    Json(req): Json<LineCommandRequest>,
) -> Result<Json<LineCommandResponse>, ServerError> {
    state.sessions.get_session(&req.session_id).await?;
    state.sessions.registry().lookup(&req.page_id).await?;

    match parse_line(&req.command)? {
        ParsedLine::Command(command) => {
            let outcome = state
                .dispatcher
                .execute(&req.page_id, command.clone(), None)
                .await?;
            Ok(Json(line_body(&command, &outcome)))
        }
        ParsedLine::JsFallback(expression) => {
            if !state.config.allow_js_fallback {
                return Err(ServerError::UnparsableLine {
                    reason: "line is not a supported page command".into(),
                    offset: 0,
                });
            }
            // Wrap in an async IIFE so `await` works inside the snippet.
            let wrapped = format!("(async () => {{ return {expression} }})()");
            let outcome = state
                .dispatcher
                .execute(
                    &req.page_id,
                    Command::Evaluate {
                        expression: wrapped,
                        arg: None,
                    },
                    None,
                )
                .await?;
            let mut body = LineCommandResponse::success();
            body.message = Some("Executed as JavaScript".to_string());
            if let Outcome::Value(value) = outcome {
                body.result = Some(value);
            }
            Ok(Json(body))
        }
    }
}

/// Human-readable bodies for the one-line form, matching the messages
/// long-lived clients already expect.
fn line_body(command: &Command, outcome: &Outcome) -> LineCommandResponse {
    let mut body = LineCommandResponse::success();
    match command {
        Command::ClickSelector { selector } => {
            body.message = Some(format!("Clicked selector: {selector}"));
        }
        Command::ClickAt { x, y } => {
            body.message = Some(format!("Clicked at position ({x:?}, {y:?})"));
        }
        Command::MouseClickXy { x, y } => {
            body.message = Some(format!("Mouse clicked at position ({x:?}, {y:?})"));
        }
        Command::Goto { url, .. } => {
            body.message = Some(format!("Navigated to {url}"));
            if let Outcome::Navigated { url } = outcome {
                body.url = Some(url.clone());
            }
        }
        Command::Fill { selector, value } => {
            body.message = Some(format!("Filled {selector} with {value}"));
        }
        Command::Type {
            selector: Some(selector),
            text,
        } => {
            body.message = Some(format!("Typed '{text}' into {selector}"));
        }
        Command::Type {
            selector: None,
            text,
        } => {
            body.message = Some(format!("Typed: {text}"));
        }
        Command::Press { key, .. } => {
            body.message = Some(format!("Pressed key: {key}"));
        }
        Command::SelectOption { selector, value } => {
            body.message = Some(format!("Selected {value} in {selector}"));
        }
        Command::WaitForSelector { selector, .. } => {
            body.message = Some(format!("Found selector: {selector}"));
        }
        Command::Wait { ms } => {
            body.message = Some(format!("Waited {ms}ms"));
        }
        Command::Screenshot { .. } => {
            body.message = Some("Screenshot taken".to_string());
            if let Outcome::ScreenshotInline { base64 } = outcome {
                body.screenshot = Some(base64.clone());
            }
        }
        Command::Reload => {
            body.message = Some("Page reloaded".to_string());
        }
        Command::Back => {
            body.message = Some("Navigated back".to_string());
        }
        Command::Forward => {
            body.message = Some("Navigated forward".to_string());
        }
        Command::Evaluate { .. } | Command::GetInfo | Command::WaitForLoadState { .. } => {}
    }
    if body.message.is_none() {
        if let Outcome::Value(value) = outcome {
            body.result = Some(value.clone());
        }
    }
    body
}

// ============================================================
// Captured logs
// ============================================================

async fn console_logs(
    State(state): State<AppState>,
    Path(pid): Path<String>,
    Query(query): Query<ConsoleQuery>,
) -> Result<Json<ConsoleLogsResponse>, ServerError> {
    let entry = state.sessions.registry().lookup(&pid).await?;

    let filter = ConsoleFilter {
        kinds: if query.types.is_empty() {
            None
        } else {
            Some(query.types.clone())
        },
        since: query.since,
        until: query.until,
        contains: query.text_contains.clone(),
    };
    let logs: Vec<ConsoleRecord> = entry
        .console
        .query(|e| filter.matches(e), query.limit)
        .iter()
        .map(ConsoleRecord::from)
        .collect();

    Ok(Json(ConsoleLogsResponse {
        page_id: pid,
        count: logs.len(),
        total_captured: entry.console.len(),
        logs,
    }))
}

async fn network_logs(
    State(state): State<AppState>,
    Path(pid): Path<String>,
    Query(query): Query<NetworkQuery>,
) -> Result<Json<NetworkLogsResponse>, ServerError> {
    let entry = state.sessions.registry().lookup(&pid).await?;

    let filter = NetworkFilter { since: query.since };
    let logs: Vec<NetworkRecord> = entry
        .network
        .query(|e| filter.matches(e), query.limit)
        .iter()
        .map(NetworkRecord::from)
        .collect();

    Ok(Json(NetworkLogsResponse {
        page_id: pid,
        count: logs.len(),
        logs,
    }))
}

async fn error_logs(
    State(state): State<AppState>,
    Path(pid): Path<String>,
    Query(query): Query<ErrorsQuery>,
) -> Result<Json<ErrorLogsResponse>, ServerError> {
    let entry = state.sessions.registry().lookup(&pid).await?;

    let filter = ConsoleFilter {
        kinds: Some(vec!["error".to_string(), "warning".to_string()]),
        ..Default::default()
    };
    let errors: Vec<ConsoleRecord> = entry
        .console
        .query(|e| filter.matches(e), query.limit)
        .iter()
        .map(ConsoleRecord::from)
        .collect();

    Ok(Json(ErrorLogsResponse {
        page_id: pid,
        count: errors.len(),
        errors,
    }))
}

// ============================================================
// Screenshots & navigation conveniences
// ============================================================

async fn get_screenshot(
    State(state): State<AppState>,
    Path((sid, pid)): Path<(String, String)>,
) -> Result<Json<ScreenshotResponse>, ServerError> {
    state.sessions.get_session(&sid).await?;
    let outcome = state
        .dispatcher
        .execute(
            &pid,
            Command::Screenshot {
                path: None,
                full_page: false,
                format: ScreenshotFormat::Png,
            },
            None,
        )
        .await?;
    match outcome {
        Outcome::ScreenshotInline { base64 } => Ok(Json(ScreenshotResponse {
            status: "success",
            screenshot: base64,
            timestamp: Utc::now().to_rfc3339(),
        })),
        other => Err(ServerError::BackendError(format!(
            "unexpected screenshot outcome: {other:?}"
        ))),
    }
}

async fn navigate_to(
    State(state): State<AppState>,
    Json(req): Json<NavigateRequest>,
) -> Result<Json<NavigateResponse>, ServerError> {
    state.sessions.get_session(&req.session_id).await?;
    let outcome = state
        .dispatcher
        .execute(
            &req.page_id,
            Command::Goto {
                url: req.url,
                wait_until: None,
            },
            None,
        )
        .await?;
    let url = match outcome {
        Outcome::Navigated { url } => url,
        other => {
            return Err(ServerError::BackendError(format!(
                "unexpected navigation outcome: {other:?}"
            )));
        }
    };
    // Best-effort title; navigation already succeeded.
    let entry = state.sessions.registry().lookup(&req.page_id).await?;
    let title = entry.handle.title().await.unwrap_or_default();
    Ok(Json(NavigateResponse {
        status: "success",
        url,
        title,
    }))
}

// ============================================================
// Vision helpers
// ============================================================

async fn bounding_boxes(
    State(state): State<AppState>,
    Json(req): Json<BoundingBoxRequest>,
) -> Result<Json<BoundingBoxResponse>, ServerError> {
    let detection = state
        .vision
        .detect(&req.screenshot, &req.api_key, req.prompt.as_deref())
        .await?;
    Ok(Json(BoundingBoxResponse {
        status: "success",
        raw_response: detection.raw_text,
        count: detection.boxes.len(),
        coordinates: detection.boxes,
    }))
}

async fn visualize_boxes(
    Json(req): Json<VisualizeRequest>,
) -> Result<Json<VisualizeResponse>, ServerError> {
    let image_bytes = decode_screenshot(&req.screenshot)?;
    let rendered = overlay::render(&image_bytes, &req.bounding_boxes, req.mode)?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(&rendered);
    Ok(Json(VisualizeResponse {
        status: "success",
        visualized_image: format!("data:image/png;base64,{encoded}"),
        mode: req.mode.as_str(),
    }))
}

fn decode_screenshot(screenshot: &str) -> Result<Vec<u8>, ServerError> {
    let data = if screenshot.starts_with("data:image") {
        screenshot
            .split_once(',')
            .map(|(_, d)| d)
            .unwrap_or(screenshot)
    } else {
        screenshot
    };
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| ServerError::bad_arguments("screenshot", format!("invalid base64: {e}")))
}
