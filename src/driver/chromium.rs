//! chromiumoxide-backed driver.
//!
//! Each session gets a dedicated Chromium process with a private
//! user-data directory; that process is the session's isolated context.
//! Firefox and WebKit have no driver in this build and surface as launch
//! failures.

use super::{
    BrowserHandle, BrowserKind, DriverError, DriverResult, EventStreams, Launcher, PageHandle,
    ScreenshotFormat, ViewportSize,
};
use crate::logs::{ConsoleEvent, ConsoleKind, NetworkDirection, NetworkEvent};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventRequestWillBeSent, EventResponseReceived,
};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, GetNavigationHistoryParams, NavigateToHistoryEntryParams,
};
use chromiumoxide::cdp::js_protocol::runtime::EventConsoleApiCalled;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use chrono::Utc;
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

const DEFAULT_VIEWPORT_WIDTH: u32 = 1280;
const DEFAULT_VIEWPORT_HEIGHT: u32 = 720;

/// Poll cadence for selector and load-state waits.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Per-page event channel depth. Forwarders run in their own tasks, so a
/// full channel backpressures the CDP stream, never the HTTP surface.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Upper bound on the request-id correlation map.
const MAX_PENDING_REQUESTS: usize = 4096;

/// Launches one Chromium process per session.
pub struct ChromiumLauncher {
    data_root: PathBuf,
}

impl ChromiumLauncher {
    pub fn new() -> Self {
        Self {
            data_root: std::env::temp_dir(),
        }
    }
}

impl Default for ChromiumLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Launcher for ChromiumLauncher {
    async fn launch(
        &self,
        kind: BrowserKind,
        headless: bool,
        session_id: &str,
    ) -> DriverResult<Arc<dyn BrowserHandle>> {
        if kind != BrowserKind::Chromium {
            return Err(DriverError::LaunchFailed(format!(
                "no {} driver available in this build; only chromium can be launched",
                kind.as_str()
            )));
        }

        let data_dir = self.data_root.join(format!("perch-chrome-{session_id}"));

        let builder = BrowserConfig::builder();
        let builder = if headless {
            builder.new_headless_mode()
        } else {
            builder.with_head()
        };
        let config = builder
            .no_sandbox()
            .arg("--disable-gpu")
            .arg("--disable-software-rasterizer")
            .user_data_dir(&data_dir)
            .viewport(chromiumoxide::handler::viewport::Viewport {
                width: DEFAULT_VIEWPORT_WIDTH,
                height: DEFAULT_VIEWPORT_HEIGHT,
                device_scale_factor: Some(1.0),
                emulating_mobile: false,
                is_landscape: true,
                has_touch: false,
            })
            .build()
            .map_err(DriverError::LaunchFailed)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| DriverError::LaunchFailed(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::warn!("CDP handler error: {e}");
                }
            }
        });

        Ok(Arc::new(ChromiumBrowser {
            browser: Mutex::new(Some(browser)),
            handler_task,
            data_dir,
        }))
    }
}

/// One Chromium process. Dropping the inner [`Browser`] kills it.
pub struct ChromiumBrowser {
    browser: Mutex<Option<Browser>>,
    handler_task: JoinHandle<()>,
    data_dir: PathBuf,
}

#[async_trait]
impl BrowserHandle for ChromiumBrowser {
    async fn new_page(&self) -> DriverResult<Arc<dyn PageHandle>> {
        let guard = self.browser.lock().await;
        let browser = guard.as_ref().ok_or(DriverError::PageClosed)?;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| DriverError::LaunchFailed(e.to_string()))?;
        Ok(Arc::new(ChromiumPage {
            page,
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }

    async fn close(&self) -> DriverResult<()> {
        let mut guard = self.browser.lock().await;
        if let Some(browser) = guard.take() {
            // Dropping the handle kills the child process.
            drop(browser);
            self.handler_task.abort();
            if let Err(e) = tokio::fs::remove_dir_all(&self.data_dir).await {
                tracing::warn!(path = %self.data_dir.display(), error = %e,
                    "Failed to clean up browser data dir");
            }
        }
        Ok(())
    }
}

/// One Chromium tab.
pub struct ChromiumPage {
    page: Page,
    closed: Arc<AtomicBool>,
}

impl ChromiumPage {
    fn map_cdp(&self, e: CdpError) -> DriverError {
        let msg = e.to_string();
        let lower = msg.to_lowercase();
        if lower.contains("timeout") || lower.contains("timed out") {
            DriverError::Timeout(msg)
        } else if lower.contains("err_aborted") {
            DriverError::NavigationInterrupted(msg)
        } else if lower.contains("target closed")
            || lower.contains("session closed")
            || lower.contains("browser closed")
            || lower.contains("page closed")
        {
            self.closed.store(true, Ordering::SeqCst);
            DriverError::PageClosed
        } else {
            DriverError::Backend(msg)
        }
    }

    async fn find(&self, selector: &str) -> DriverResult<chromiumoxide::element::Element> {
        self.page
            .find_element(selector)
            .await
            .map_err(|_| DriverError::ElementNotFound(selector.to_string()))
    }

    async fn eval(&self, script: String) -> DriverResult<Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| self.map_cdp(e))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    /// Poll `script` (which must evaluate to a boolean) until it holds.
    async fn poll_until(&self, script: &str, timeout: Duration) -> DriverResult<bool> {
        let start = std::time::Instant::now();
        loop {
            match self.eval(script.to_string()).await {
                Ok(Value::Bool(true)) => return Ok(true),
                Ok(_) => {}
                Err(e) => {
                    let text = e.to_string();
                    // Selector syntax errors never resolve; fail fast.
                    if text.contains("SyntaxError") || text.contains("is not a valid selector") {
                        return Err(DriverError::Backend(text));
                    }
                }
            }
            if start.elapsed() >= timeout {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// Script checking that a selector's element exists and is visible.
fn visible_script(selector: &str) -> String {
    format!(
        r"(() => {{
            const el = document.querySelector({sel});
            if (!el) return false;
            const style = window.getComputedStyle(el);
            return style.display !== 'none' &&
                   style.visibility !== 'hidden' &&
                   style.opacity !== '0' &&
                   el.offsetParent !== null;
        }})()",
        sel = js_quote(selector)
    )
}

fn attached_script(selector: &str) -> String {
    format!("document.querySelector({}) !== null", js_quote(selector))
}

/// Quote a string for embedding into a JavaScript expression.
fn js_quote(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

#[async_trait]
impl PageHandle for ChromiumPage {
    async fn goto(&self, url: &str, wait_until: Option<&str>) -> DriverResult<String> {
        self.page.goto(url).await.map_err(|e| self.map_cdp(e))?;
        if let Some(state) = wait_until {
            self.wait_for_load_state(state, Duration::from_secs(30))
                .await?;
        }
        self.url().await
    }

    async fn click(&self, selector: &str) -> DriverResult<()> {
        let element = self.find(selector).await?;
        element
            .click()
            .await
            .map(|_| ())
            .map_err(|e| self.map_cdp(e))
    }

    async fn click_at(&self, x: f64, y: f64) -> DriverResult<()> {
        let mut press = DispatchMouseEventParams::new(DispatchMouseEventType::MousePressed, x, y);
        press.button = Some(MouseButton::Left);
        press.click_count = Some(1);
        let mut release =
            DispatchMouseEventParams::new(DispatchMouseEventType::MouseReleased, x, y);
        release.button = Some(MouseButton::Left);
        release.click_count = Some(1);

        self.page
            .execute(press)
            .await
            .map_err(|e| self.map_cdp(e))?;
        self.page
            .execute(release)
            .await
            .map_err(|e| self.map_cdp(e))?;
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> DriverResult<()> {
        let element = self.find(selector).await?;
        element.click().await.map_err(|e| self.map_cdp(e))?;
        // Select-all then backspace clears existing text before typing.
        self.eval(format!(
            "document.querySelector({}).select()",
            js_quote(selector)
        ))
        .await?;
        element
            .press_key("Backspace")
            .await
            .map_err(|e| self.map_cdp(e))?;
        element
            .type_str(value)
            .await
            .map(|_| ())
            .map_err(|e| self.map_cdp(e))
    }

    async fn type_text(&self, selector: Option<&str>, text: &str) -> DriverResult<()> {
        let element = match selector {
            Some(sel) => {
                let element = self.find(sel).await?;
                // Click to focus before typing.
                element.click().await.map_err(|e| self.map_cdp(e))?;
                tokio::time::sleep(Duration::from_millis(50)).await;
                element
            }
            None => self.find(":focus").await?,
        };

        // type_str has no newline support; press Enter between lines.
        let parts: Vec<&str> = text.split('\n').collect();
        for (i, part) in parts.iter().enumerate() {
            if !part.is_empty() {
                element
                    .type_str(*part)
                    .await
                    .map_err(|e| self.map_cdp(e))?;
            }
            if i < parts.len() - 1 {
                element
                    .press_key("Enter")
                    .await
                    .map_err(|e| self.map_cdp(e))?;
            }
        }
        Ok(())
    }

    async fn press(&self, selector: Option<&str>, key: &str) -> DriverResult<()> {
        let element = match selector {
            Some(sel) => self.find(sel).await?,
            None => self.find(":focus").await?,
        };
        element
            .press_key(key)
            .await
            .map(|_| ())
            .map_err(|e| self.map_cdp(e))
    }

    async fn select_option(&self, selector: &str, value: &str) -> DriverResult<()> {
        self.find(selector).await?;
        self.eval(format!(
            r"(() => {{
                const el = document.querySelector({sel});
                el.value = {val};
                el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                el.dispatchEvent(new Event('change', {{ bubbles: true }}));
            }})()",
            sel = js_quote(selector),
            val = js_quote(value)
        ))
        .await?;
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        state: &str,
        timeout: Duration,
    ) -> DriverResult<()> {
        let script = match state {
            "visible" => visible_script(selector),
            "hidden" => format!("!({})", visible_script(selector)),
            "detached" => format!("!({})", attached_script(selector)),
            _ => attached_script(selector),
        };
        if self.poll_until(&script, timeout).await? {
            Ok(())
        } else {
            Err(DriverError::ElementNotFound(selector.to_string()))
        }
    }

    async fn wait_for_load_state(&self, state: &str, timeout: Duration) -> DriverResult<()> {
        let script = match state {
            "domcontentloaded" => "document.readyState !== 'loading'",
            // networkidle approximated as full load plus a settle delay.
            _ => "document.readyState === 'complete'",
        };
        if !self.poll_until(script, timeout).await? {
            return Err(DriverError::Timeout(format!(
                "load state {state:?} not reached within {timeout:?}"
            )));
        }
        if state == "networkidle" {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        Ok(())
    }

    async fn screenshot(&self, format: ScreenshotFormat, full_page: bool) -> DriverResult<Vec<u8>> {
        let builder = match format {
            ScreenshotFormat::Png => {
                ScreenshotParams::builder().format(CaptureScreenshotFormat::Png)
            }
            ScreenshotFormat::Jpeg { quality } => {
                let b = ScreenshotParams::builder().format(CaptureScreenshotFormat::Jpeg);
                match quality {
                    Some(q) => b.quality(i64::from(q)),
                    None => b,
                }
            }
        };
        let params = builder.full_page(full_page).build();
        self.page
            .screenshot(params)
            .await
            .map_err(|e| self.map_cdp(e))
    }

    async fn evaluate(&self, expression: &str) -> DriverResult<Value> {
        self.eval(expression.to_string()).await
    }

    async fn url(&self) -> DriverResult<String> {
        let url = self.page.url().await.map_err(|e| self.map_cdp(e))?;
        Ok(url.unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn title(&self) -> DriverResult<String> {
        let title = self.page.get_title().await.map_err(|e| self.map_cdp(e))?;
        Ok(title.unwrap_or_default())
    }

    async fn viewport(&self) -> DriverResult<ViewportSize> {
        let value = self
            .eval("({width: window.innerWidth, height: window.innerHeight})".to_string())
            .await?;
        serde_json::from_value(value).map_err(|e| DriverError::Backend(e.to_string()))
    }

    async fn reload(&self) -> DriverResult<String> {
        self.page
            .reload()
            .await
            .map(|_| ())
            .map_err(|e| self.map_cdp(e))?;
        self.url().await
    }

    async fn back(&self) -> DriverResult<String> {
        self.history_step(-1).await
    }

    async fn forward(&self) -> DriverResult<String> {
        self.history_step(1).await
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn subscribe(&self) -> DriverResult<EventStreams> {
        let (console_tx, console_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (network_tx, network_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let mut console_events = self
            .page
            .event_listener::<EventConsoleApiCalled>()
            .await
            .map_err(|e| self.map_cdp(e))?;
        let mut requests = self
            .page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(|e| self.map_cdp(e))?;
        let mut responses = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|e| self.map_cdp(e))?;
        let mut failures = self
            .page
            .event_listener::<EventLoadingFailed>()
            .await
            .map_err(|e| self.map_cdp(e))?;

        let closed = self.closed.clone();
        let console_task = tokio::spawn(async move {
            while let Some(event) = console_events.next().await {
                if console_tx.send(convert_console(&event)).await.is_err() {
                    break;
                }
            }
            // Event stream end means the target went away.
            closed.store(true, Ordering::SeqCst);
        });

        let network_task = tokio::spawn(async move {
            // request-id -> (method, url), for attaching the method to
            // responses and failures.
            let mut pending: HashMap<String, (String, String)> = HashMap::new();
            loop {
                let event = tokio::select! {
                    ev = requests.next() => match ev {
                        Some(ev) => {
                            if pending.len() >= MAX_PENDING_REQUESTS {
                                pending.clear();
                            }
                            let method = ev.request.method.clone();
                            let url = ev.request.url.clone();
                            pending.insert(
                                ev.request_id.inner().clone(),
                                (method.clone(), url.clone()),
                            );
                            NetworkEvent {
                                ts: Utc::now(),
                                method,
                                url,
                                direction: NetworkDirection::Request,
                                status: None,
                                failure: None,
                            }
                        }
                        None => break,
                    },
                    ev = responses.next() => match ev {
                        Some(ev) => {
                            let method = pending
                                .get(ev.request_id.inner())
                                .map(|(m, _)| m.clone())
                                .unwrap_or_else(|| "GET".to_string());
                            NetworkEvent {
                                ts: Utc::now(),
                                method,
                                url: ev.response.url.clone(),
                                direction: NetworkDirection::Response,
                                status: Some(ev.response.status),
                                failure: None,
                            }
                        }
                        None => break,
                    },
                    ev = failures.next() => match ev {
                        Some(ev) => {
                            match pending.remove(ev.request_id.inner()) {
                                Some((method, url)) => NetworkEvent {
                                    ts: Utc::now(),
                                    method,
                                    url,
                                    direction: NetworkDirection::Failed,
                                    status: None,
                                    failure: Some(ev.error_text.clone()),
                                },
                                None => {
                                    tracing::debug!(
                                        request_id = %ev.request_id.inner(),
                                        "Dropping uncorrelated request failure"
                                    );
                                    continue;
                                }
                            }
                        }
                        None => break,
                    },
                };
                if network_tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        Ok(EventStreams {
            console: console_rx,
            network: network_rx,
            forwarders: vec![console_task, network_task],
        })
    }

    async fn close(&self) -> DriverResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.page
            .clone()
            .close()
            .await
            .map(|_| ())
            .map_err(|e| self.map_cdp(e))
    }
}

impl ChromiumPage {
    async fn history_step(&self, delta: i64) -> DriverResult<String> {
        let history = self
            .page
            .execute(GetNavigationHistoryParams::default())
            .await
            .map_err(|e| self.map_cdp(e))?;
        let target = history.current_index + delta;
        if target < 0 || target as usize >= history.entries.len() {
            // Nothing to navigate to; report the current URL unchanged.
            return self.url().await;
        }
        let entry_id = history.entries[target as usize].id;
        self.page
            .execute(NavigateToHistoryEntryParams::new(entry_id))
            .await
            .map_err(|e| self.map_cdp(e))?;
        self.url().await
    }
}

/// Map a CDP console event into a captured [`ConsoleEvent`].
///
/// Argument rendering is best-effort: JSON value first, then the string
/// description, then the unserializable form (NaN, Infinity, ...).
fn convert_console(event: &EventConsoleApiCalled) -> ConsoleEvent {
    let kind_str = format!("{:?}", event.r#type).to_lowercase();
    let kind = ConsoleKind::from_backend(&kind_str);

    let rendered: Vec<String> = event
        .args
        .iter()
        .map(|arg| {
            if let Some(value) = &arg.value {
                match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                }
            } else if let Some(desc) = &arg.description {
                desc.clone()
            } else if let Some(unser) = &arg.unserializable_value {
                unser.inner().clone()
            } else {
                String::from("[unknown]")
            }
        })
        .collect();
    let text = rendered.join(" ");

    let args: Vec<Value> = event
        .args
        .iter()
        .map(|arg| {
            if let Some(value) = &arg.value {
                value.clone()
            } else if let Some(desc) = &arg.description {
                Value::String(desc.clone())
            } else if let Some(unser) = &arg.unserializable_value {
                Value::String(unser.inner().clone())
            } else {
                Value::Null
            }
        })
        .collect();

    let location = event.stack_trace.as_ref().and_then(|trace| {
        trace
            .call_frames
            .first()
            .map(|frame| format!("{}:{}", frame.url, frame.line_number))
    });

    ConsoleEvent {
        ts: Utc::now(),
        kind,
        text,
        location,
        args,
    }
}
