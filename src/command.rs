//! Command vocabulary and dispatch.
//!
//! Clients speak two forms: the structured `{command, args, kwargs}` body
//! and the one-line `await page.click(...)` string. Both are parsed into
//! the same [`Command`] enum exactly once; the dispatcher pattern-matches
//! it onto the driver. Argument-shape violations are reported as
//! `BadArguments` naming the offending field before anything touches a
//! page.

pub mod line;

use crate::driver::{DriverError, PageHandle, ScreenshotFormat, ViewportSize};
use crate::error::ServerError;
use crate::registry::PageEntry;
use crate::sessions::SessionManager;
use base64::Engine;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Margin subtracted from the effective timeout when it is handed to a
/// driver-side wait loop, so the loop's typed expiry (ElementNotFound,
/// load-state Timeout) wins the race against the outer wall clock.
const WAIT_MARGIN: Duration = Duration::from_millis(100);

const SELECTOR_STATES: [&str; 4] = ["attached", "visible", "hidden", "detached"];
const LOAD_STATES: [&str; 3] = ["load", "domcontentloaded", "networkidle"];

/// One fully-parsed command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Goto {
        url: String,
        wait_until: Option<String>,
    },
    ClickSelector {
        selector: String,
    },
    /// `click` with a `{position: {x, y}}` argument.
    ClickAt {
        x: f64,
        y: f64,
    },
    /// Explicit `mouse_click_xy` / `page.mouse.click(x, y)`.
    MouseClickXy {
        x: f64,
        y: f64,
    },
    Fill {
        selector: String,
        value: String,
    },
    /// `selector` of `None` types into the focused element.
    Type {
        selector: Option<String>,
        text: String,
    },
    Press {
        selector: Option<String>,
        key: String,
    },
    SelectOption {
        selector: String,
        value: String,
    },
    WaitForSelector {
        selector: String,
        state: Option<String>,
    },
    WaitForLoadState {
        state: String,
    },
    Wait {
        ms: u64,
    },
    Screenshot {
        path: Option<String>,
        full_page: bool,
        format: ScreenshotFormat,
    },
    Evaluate {
        expression: String,
        arg: Option<Value>,
    },
    GetInfo,
    Reload,
    Back,
    Forward,
}

/// Result of a successful dispatch, before wire encoding.
#[derive(Debug, Clone)]
pub enum Outcome {
    Done,
    ClickedAt { x: f64, y: f64 },
    Navigated { url: String },
    ScreenshotFile { path: String },
    ScreenshotInline { base64: String },
    Value(Value),
    Info {
        url: String,
        title: String,
        viewport: ViewportSize,
    },
}

impl Command {
    /// Parse the structured form. Returns the command plus the per-call
    /// timeout override (the `timeout` kwarg, in milliseconds).
    pub fn from_parts(
        name: &str,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> Result<(Self, Option<Duration>), ServerError> {
        let timeout = match kwargs.get("timeout") {
            None => None,
            Some(v) => Some(Duration::from_millis(u64_value(v).ok_or_else(|| {
                ServerError::bad_arguments("timeout", "expected milliseconds as a number")
            })?)),
        };

        let command = match name {
            "goto" => Command::Goto {
                url: str_arg(args, 0, kwargs, "url")?,
                wait_until: opt_str_kwarg(kwargs, "wait_until")?,
            },
            "click" => match args.first() {
                Some(v) => Command::ClickSelector {
                    selector: as_str(v, "selector")?,
                },
                None => {
                    let position = kwargs.get("position").ok_or_else(|| {
                        ServerError::bad_arguments("selector", "provide a selector or a position")
                    })?;
                    let (x, y) = position_value(position)?;
                    Command::ClickAt { x, y }
                }
            },
            "fill" => Command::Fill {
                selector: str_arg(args, 0, kwargs, "selector")?,
                value: str_arg(args, 1, kwargs, "value")?,
            },
            "type" => match args.len() {
                0 => {
                    return Err(ServerError::bad_arguments("text", "missing text to type"));
                }
                1 => Command::Type {
                    selector: None,
                    text: as_str(&args[0], "text")?,
                },
                _ => Command::Type {
                    selector: Some(as_str(&args[0], "selector")?),
                    text: as_str(&args[1], "text")?,
                },
            },
            "press" => match args.len() {
                0 => return Err(ServerError::bad_arguments("key", "missing key to press")),
                1 => Command::Press {
                    selector: None,
                    key: as_str(&args[0], "key")?,
                },
                _ => Command::Press {
                    selector: Some(as_str(&args[0], "selector")?),
                    key: as_str(&args[1], "key")?,
                },
            },
            "select_option" => Command::SelectOption {
                selector: str_arg(args, 0, kwargs, "selector")?,
                value: str_arg(args, 1, kwargs, "value")?,
            },
            "wait_for_selector" => {
                let state = opt_str_kwarg(kwargs, "state")?;
                if let Some(state) = &state {
                    if !SELECTOR_STATES.contains(&state.as_str()) {
                        return Err(ServerError::bad_arguments(
                            "state",
                            format!("expected one of {SELECTOR_STATES:?}"),
                        ));
                    }
                }
                Command::WaitForSelector {
                    selector: str_arg(args, 0, kwargs, "selector")?,
                    state,
                }
            }
            "wait_for_load_state" => {
                let state = match args.first() {
                    Some(v) => as_str(v, "state")?,
                    None => opt_str_kwarg(kwargs, "state")?.unwrap_or_else(|| "load".to_string()),
                };
                if !LOAD_STATES.contains(&state.as_str()) {
                    return Err(ServerError::bad_arguments(
                        "state",
                        format!("expected one of {LOAD_STATES:?}"),
                    ));
                }
                Command::WaitForLoadState { state }
            }
            "wait" | "wait_for_timeout" => {
                let ms = args
                    .first()
                    .and_then(u64_value)
                    .ok_or_else(|| {
                        ServerError::bad_arguments("timeout", "expected milliseconds as a number")
                    })?;
                Command::Wait { ms }
            }
            "screenshot" => {
                let format = match opt_str_kwarg(kwargs, "format")?.as_deref() {
                    None | Some("png") => ScreenshotFormat::Png,
                    Some("jpeg") | Some("jpg") => {
                        let quality = match kwargs.get("quality") {
                            None => None,
                            Some(v) => {
                                let q = u64_value(v).filter(|q| *q <= 100).ok_or_else(|| {
                                    ServerError::bad_arguments(
                                        "quality",
                                        "expected an integer in [0, 100]",
                                    )
                                })?;
                                Some(q as u8)
                            }
                        };
                        ScreenshotFormat::Jpeg { quality }
                    }
                    Some(other) => {
                        return Err(ServerError::bad_arguments(
                            "format",
                            format!("unsupported image format {other:?}"),
                        ));
                    }
                };
                Command::Screenshot {
                    path: opt_str_kwarg(kwargs, "path")?,
                    full_page: bool_kwarg(kwargs, "full_page")?,
                    format,
                }
            }
            "evaluate" => Command::Evaluate {
                expression: str_arg(args, 0, kwargs, "expression")?,
                arg: args.get(1).cloned(),
            },
            "get_info" => Command::GetInfo,
            "reload" => Command::Reload,
            "back" | "go_back" => Command::Back,
            "forward" | "go_forward" => Command::Forward,
            "mouse_click_xy" => Command::MouseClickXy {
                x: f64_arg(args, 0, "x")?,
                y: f64_arg(args, 1, "y")?,
            },
            other => return Err(ServerError::UnknownCommand(other.to_string())),
        };

        Ok((command, timeout))
    }
}

/// Extract `{x, y}` (tolerating `X`/`Y` spellings) from a position value.
fn position_value(position: &Value) -> Result<(f64, f64), ServerError> {
    let obj = position.as_object().ok_or_else(|| {
        ServerError::bad_arguments("position", "expected an object with x and y")
    })?;
    let coord = |lower: &str, upper: &str| {
        obj.get(lower)
            .or_else(|| obj.get(upper))
            .and_then(Value::as_f64)
    };
    match (coord("x", "X"), coord("y", "Y")) {
        (Some(x), Some(y)) => Ok((x, y)),
        _ => Err(ServerError::bad_arguments(
            "position",
            "expected numeric x and y",
        )),
    }
}

fn as_str(value: &Value, field: &str) -> Result<String, ServerError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ServerError::bad_arguments(field, "expected a string"))
}

/// Positional string argument with a kwargs fallback of the same name.
fn str_arg(
    args: &[Value],
    index: usize,
    kwargs: &Map<String, Value>,
    field: &str,
) -> Result<String, ServerError> {
    match args.get(index).or_else(|| kwargs.get(field)) {
        Some(v) => as_str(v, field),
        None => Err(ServerError::bad_arguments(field, "missing required argument")),
    }
}

fn f64_arg(args: &[Value], index: usize, field: &str) -> Result<f64, ServerError> {
    args.get(index)
        .and_then(Value::as_f64)
        .ok_or_else(|| ServerError::bad_arguments(field, "expected a number"))
}

fn opt_str_kwarg(kwargs: &Map<String, Value>, field: &str) -> Result<Option<String>, ServerError> {
    match kwargs.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => as_str(v, field).map(Some),
    }
}

fn bool_kwarg(kwargs: &Map<String, Value>, field: &str) -> Result<bool, ServerError> {
    match kwargs.get(field) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(ServerError::bad_arguments(field, "expected a boolean")),
    }
}

fn u64_value(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
}

/// Translate a classified driver failure into the client taxonomy.
pub fn driver_error(page_id: &str, e: DriverError) -> ServerError {
    match e {
        DriverError::Timeout(m) => ServerError::Timeout(m),
        DriverError::ElementNotFound(s) => ServerError::ElementNotFound(s),
        DriverError::NavigationInterrupted(m) => ServerError::NavigationInterrupted(m),
        DriverError::PageClosed => ServerError::PageGone(page_id.to_string()),
        DriverError::LaunchFailed(m) => ServerError::BackendLaunchFailed(m),
        DriverError::Backend(m) => ServerError::BackendError(m),
    }
}

/// Executes commands against pages, one at a time per page.
pub struct Dispatcher {
    manager: Arc<SessionManager>,
}

impl Dispatcher {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    /// Run `command` against `page_id` under the page's command gate and
    /// the effective timeout. A successful dispatch refreshes the parent
    /// session's idle clock.
    pub async fn execute(
        &self,
        page_id: &str,
        command: Command,
        timeout_override: Option<Duration>,
    ) -> Result<Outcome, ServerError> {
        let entry = self.manager.registry().lookup(page_id).await?;
        let effective = timeout_override
            .unwrap_or_else(|| self.manager.config().default_command_timeout);

        let _gate = entry.gate.lock().await;
        // The backend may have closed the page while we queued.
        if entry.handle.is_closed() {
            return Err(ServerError::PageGone(page_id.to_string()));
        }

        let screenshot_dir = self.manager.config().screenshot_dir.clone();
        let outcome = match tokio::time::timeout(
            effective,
            run(&entry, &command, effective, &screenshot_dir),
        )
        .await
        {
            Err(_) => {
                return Err(ServerError::Timeout(format!(
                    "command timed out after {}ms",
                    effective.as_millis()
                )));
            }
            Ok(result) => result?,
        };

        self.manager.touch(&entry.session_id).await;
        Ok(outcome)
    }
}

async fn run(
    entry: &Arc<PageEntry>,
    command: &Command,
    effective: Duration,
    screenshot_dir: &Path,
) -> Result<Outcome, ServerError> {
    let page = &entry.handle;
    let wait_budget = effective
        .saturating_sub(WAIT_MARGIN)
        .max(Duration::from_millis(10));
    let map = |e: DriverError| driver_error(&entry.id, e);

    match command {
        Command::Goto { url, wait_until } => {
            let url = page.goto(url, wait_until.as_deref()).await.map_err(map)?;
            Ok(Outcome::Navigated { url })
        }
        Command::ClickSelector { selector } => {
            page.click(selector).await.map_err(map)?;
            Ok(Outcome::Done)
        }
        Command::ClickAt { x, y } | Command::MouseClickXy { x, y } => {
            page.click_at(*x, *y).await.map_err(map)?;
            Ok(Outcome::ClickedAt { x: *x, y: *y })
        }
        Command::Fill { selector, value } => {
            page.fill(selector, value).await.map_err(map)?;
            Ok(Outcome::Done)
        }
        Command::Type { selector, text } => {
            page.type_text(selector.as_deref(), text).await.map_err(map)?;
            Ok(Outcome::Done)
        }
        Command::Press { selector, key } => {
            page.press(selector.as_deref(), key).await.map_err(map)?;
            Ok(Outcome::Done)
        }
        Command::SelectOption { selector, value } => {
            page.select_option(selector, value).await.map_err(map)?;
            Ok(Outcome::Done)
        }
        Command::WaitForSelector { selector, state } => {
            page.wait_for_selector(
                selector,
                state.as_deref().unwrap_or("attached"),
                wait_budget,
            )
            .await
            .map_err(map)?;
            Ok(Outcome::Done)
        }
        Command::WaitForLoadState { state } => {
            page.wait_for_load_state(state, wait_budget)
                .await
                .map_err(map)?;
            Ok(Outcome::Done)
        }
        Command::Wait { ms } => {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
            Ok(Outcome::Done)
        }
        Command::Screenshot {
            path,
            full_page,
            format,
        } => {
            let bytes = page.screenshot(*format, *full_page).await.map_err(map)?;
            match path {
                Some(path) => {
                    let resolved = resolve_screenshot_path(screenshot_dir, path);
                    tokio::fs::write(&resolved, &bytes)
                        .await
                        .map_err(|e| ServerError::BackendError(format!(
                            "failed to write screenshot to {}: {e}",
                            resolved.display()
                        )))?;
                    Ok(Outcome::ScreenshotFile {
                        path: resolved.display().to_string(),
                    })
                }
                None => Ok(Outcome::ScreenshotInline {
                    base64: base64::engine::general_purpose::STANDARD.encode(&bytes),
                }),
            }
        }
        Command::Evaluate { expression, arg } => {
            let expr = match arg {
                Some(arg) => format!("((arg) => ({expression}))({arg})"),
                None => expression.clone(),
            };
            let value = page.evaluate(&expr).await.map_err(map)?;
            Ok(Outcome::Value(value))
        }
        Command::GetInfo => {
            let url = page.url().await.map_err(map)?;
            let title = page.title().await.map_err(map)?;
            let viewport = page.viewport().await.map_err(map)?;
            Ok(Outcome::Info {
                url,
                title,
                viewport,
            })
        }
        Command::Reload => {
            let url = page.reload().await.map_err(map)?;
            Ok(Outcome::Navigated { url })
        }
        Command::Back => {
            let url = page.back().await.map_err(map)?;
            Ok(Outcome::Navigated { url })
        }
        Command::Forward => {
            let url = page.forward().await.map_err(map)?;
            Ok(Outcome::Navigated { url })
        }
    }
}

/// Relative screenshot paths land in the configured screenshot dir.
fn resolve_screenshot_path(dir: &Path, path: &str) -> PathBuf {
    let p = PathBuf::from(path);
    if p.is_absolute() {
        p
    } else {
        dir.join(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::driver::testing::StubLauncher;
    use serde_json::json;

    fn kwargs(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    // ========================================================================
    // Structured-form parsing
    // ========================================================================

    #[test]
    fn goto_takes_url_and_wait_until() {
        let (cmd, timeout) = Command::from_parts(
            "goto",
            &[json!("https://example.com")],
            &kwargs(&[("wait_until", json!("load"))]),
        )
        .unwrap();
        assert_eq!(
            cmd,
            Command::Goto {
                url: "https://example.com".into(),
                wait_until: Some("load".into()),
            }
        );
        assert_eq!(timeout, None);
    }

    #[test]
    fn click_accepts_selector_or_position() {
        let (cmd, _) = Command::from_parts("click", &[json!("#submit")], &Map::new()).unwrap();
        assert_eq!(
            cmd,
            Command::ClickSelector {
                selector: "#submit".into()
            }
        );

        let (cmd, _) = Command::from_parts(
            "click",
            &[],
            &kwargs(&[("position", json!({"x": 795, "y": 60}))]),
        )
        .unwrap();
        assert_eq!(cmd, Command::ClickAt { x: 795.0, y: 60.0 });

        // The original tolerated capitalized keys.
        let (cmd, _) = Command::from_parts(
            "click",
            &[],
            &kwargs(&[("position", json!({"X": 10.5, "Y": 20}))]),
        )
        .unwrap();
        assert_eq!(cmd, Command::ClickAt { x: 10.5, y: 20.0 });
    }

    #[test]
    fn click_without_selector_or_position_names_the_field() {
        let err = Command::from_parts("click", &[], &Map::new()).unwrap_err();
        assert_eq!(err.kind(), "BadArguments");
        assert!(err.to_string().contains("selector"));
    }

    #[test]
    fn unknown_command_is_rejected() {
        let err = Command::from_parts("dance", &[], &Map::new()).unwrap_err();
        assert_eq!(err.kind(), "UnknownCommand");
    }

    #[test]
    fn type_with_one_arg_targets_the_focused_element() {
        let (cmd, _) = Command::from_parts("type", &[json!("hello")], &Map::new()).unwrap();
        assert_eq!(
            cmd,
            Command::Type {
                selector: None,
                text: "hello".into()
            }
        );
    }

    #[test]
    fn timeout_kwarg_becomes_an_override() {
        let (_, timeout) = Command::from_parts(
            "goto",
            &[json!("https://example.com")],
            &kwargs(&[("timeout", json!(5000))]),
        )
        .unwrap();
        assert_eq!(timeout, Some(Duration::from_millis(5000)));
    }

    #[test]
    fn screenshot_format_is_validated() {
        let err = Command::from_parts(
            "screenshot",
            &[],
            &kwargs(&[("format", json!("bmp"))]),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "BadArguments");
        assert!(err.to_string().contains("format"));

        let (cmd, _) = Command::from_parts(
            "screenshot",
            &[],
            &kwargs(&[("format", json!("jpeg")), ("quality", json!(80))]),
        )
        .unwrap();
        assert_eq!(
            cmd,
            Command::Screenshot {
                path: None,
                full_page: false,
                format: ScreenshotFormat::Jpeg { quality: Some(80) },
            }
        );
    }

    #[test]
    fn wait_state_is_validated() {
        let err = Command::from_parts(
            "wait_for_selector",
            &[json!("#x")],
            &kwargs(&[("state", json!("shimmering"))]),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "BadArguments");
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    async fn dispatcher_with(
        cfg: Config,
        delay: Duration,
    ) -> (Dispatcher, Arc<SessionManager>, String, Arc<StubLauncher>) {
        let launcher = Arc::new(StubLauncher::with_delay(delay));
        let manager = SessionManager::start(Arc::new(cfg), launcher.clone());
        let session = manager.create_session("chromium", true).await.unwrap();
        let page_id = manager.create_page(&session.id, None).await.unwrap();
        (Dispatcher::new(manager.clone()), manager, page_id, launcher)
    }

    #[tokio::test]
    async fn goto_reports_the_landing_url() {
        let (dispatcher, _m, page_id, _l) =
            dispatcher_with(Config::default(), Duration::ZERO).await;
        let outcome = dispatcher
            .execute(
                &page_id,
                Command::Goto {
                    url: "https://example.com".into(),
                    wait_until: None,
                },
                None,
            )
            .await
            .unwrap();
        match outcome {
            Outcome::Navigated { url } => assert_eq!(url, "https://example.com/"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn dispatch_on_unknown_page_is_not_found() {
        let (dispatcher, _m, _page_id, _l) =
            dispatcher_with(Config::default(), Duration::ZERO).await;
        let err = dispatcher
            .execute("nope1234", Command::GetInfo, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "PageNotFound");
    }

    #[tokio::test]
    async fn missing_element_maps_to_element_not_found() {
        let (dispatcher, _m, page_id, _l) =
            dispatcher_with(Config::default(), Duration::ZERO).await;
        let err = dispatcher
            .execute(
                &page_id,
                Command::ClickSelector {
                    selector: crate::driver::testing::MISSING_SELECTOR.into(),
                },
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ElementNotFound");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_commands_time_out() {
        let (dispatcher, _m, page_id, _l) =
            dispatcher_with(Config::default(), Duration::from_secs(60)).await;
        let err = dispatcher
            .execute(
                &page_id,
                Command::ClickSelector {
                    selector: "#slow".into(),
                },
                Some(Duration::from_millis(500)),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Timeout");
    }

    /// Two concurrent commands on the same page never interleave: the
    /// operation log shows strict start/end pairs.
    #[tokio::test]
    async fn same_page_commands_are_serialized() {
        let (dispatcher, _m, page_id, launcher) =
            dispatcher_with(Config::default(), Duration::from_millis(20)).await;
        let dispatcher = Arc::new(dispatcher);

        let mut handles = Vec::new();
        for _ in 0..5 {
            let d = dispatcher.clone();
            let pid = page_id.clone();
            handles.push(tokio::spawn(async move {
                d.execute(
                    &pid,
                    Command::ClickSelector {
                        selector: "#a".into(),
                    },
                    None,
                )
                .await
                .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let ops = launcher.launched()[0].pages()[0].ops();
        assert_eq!(ops.len(), 10);
        for pair in ops.chunks(2) {
            assert_eq!(pair[0], "click:start");
            assert_eq!(pair[1], "click:end");
        }
    }

    /// Commands on different pages of the same session overlap.
    #[tokio::test(start_paused = true)]
    async fn different_pages_run_in_parallel() {
        let launcher = Arc::new(StubLauncher::with_delay(Duration::from_millis(100)));
        let manager = SessionManager::start(Arc::new(Config::default()), launcher.clone());
        let session = manager.create_session("chromium", true).await.unwrap();
        let p1 = manager.create_page(&session.id, None).await.unwrap();
        let p2 = manager.create_page(&session.id, None).await.unwrap();
        let dispatcher = Arc::new(Dispatcher::new(manager));

        let started = tokio::time::Instant::now();
        let a = {
            let d = dispatcher.clone();
            let pid = p1.clone();
            tokio::spawn(async move {
                d.execute(
                    &pid,
                    Command::ClickSelector {
                        selector: "#a".into(),
                    },
                    None,
                )
                .await
                .unwrap()
            })
        };
        let b = {
            let d = dispatcher.clone();
            let pid = p2.clone();
            tokio::spawn(async move {
                d.execute(
                    &pid,
                    Command::ClickSelector {
                        selector: "#b".into(),
                    },
                    None,
                )
                .await
                .unwrap()
            })
        };
        a.await.unwrap();
        b.await.unwrap();

        // Serialized execution would need 200ms of virtual time.
        assert!(started.elapsed() < Duration::from_millis(180));
    }

    #[tokio::test]
    async fn screenshot_with_path_writes_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config {
            screenshot_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let (dispatcher, _m, page_id, _l) = dispatcher_with(cfg, Duration::ZERO).await;

        let outcome = dispatcher
            .execute(
                &page_id,
                Command::Screenshot {
                    path: Some("shot.png".into()),
                    full_page: false,
                    format: ScreenshotFormat::Png,
                },
                None,
            )
            .await
            .unwrap();
        match outcome {
            Outcome::ScreenshotFile { path } => {
                assert!(path.starts_with(dir.path().to_str().unwrap()));
                assert!(std::fs::metadata(&path).unwrap().len() > 0);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}
