//! Deterministic stub driver for tests.
//!
//! Pages are plain state machines: navigation edits an in-memory history,
//! input commands are recorded into an operation log, and tests inject
//! console/network events directly into the subscription channels. An
//! optional per-operation delay makes serialization and parallelism
//! observable.

use super::{
    BrowserHandle, BrowserKind, DriverError, DriverResult, EventStreams, Launcher, PageHandle,
    ScreenshotFormat, ViewportSize,
};
use crate::logs::{ConsoleEvent, ConsoleKind, NetworkEvent};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const STUB_CHANNEL_CAPACITY: usize = 2048;

/// Selector the stub always reports as absent, for ElementNotFound paths.
pub const MISSING_SELECTOR: &str = "#missing";

pub struct StubLauncher {
    delay: Duration,
    fail_launch: AtomicBool,
    launched: Mutex<Vec<Arc<StubBrowser>>>,
}

impl StubLauncher {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    /// Every page operation on browsers from this launcher takes `delay`.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            fail_launch: AtomicBool::new(false),
            launched: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_next_launch(&self) {
        self.fail_launch.store(true, Ordering::SeqCst);
    }

    pub fn launched(&self) -> Vec<Arc<StubBrowser>> {
        self.launched.lock().unwrap().clone()
    }
}

impl Default for StubLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Launcher for StubLauncher {
    async fn launch(
        &self,
        _kind: BrowserKind,
        _headless: bool,
        _session_id: &str,
    ) -> DriverResult<Arc<dyn BrowserHandle>> {
        if self.fail_launch.swap(false, Ordering::SeqCst) {
            return Err(DriverError::LaunchFailed("stub launch failure".into()));
        }
        let browser = Arc::new(StubBrowser {
            closed: AtomicBool::new(false),
            delay: self.delay,
            pages: Mutex::new(Vec::new()),
        });
        self.launched.lock().unwrap().push(browser.clone());
        Ok(browser)
    }
}

pub struct StubBrowser {
    closed: AtomicBool,
    delay: Duration,
    pages: Mutex<Vec<Arc<StubPage>>>,
}

impl StubBrowser {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn pages(&self) -> Vec<Arc<StubPage>> {
        self.pages.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrowserHandle for StubBrowser {
    async fn new_page(&self) -> DriverResult<Arc<dyn PageHandle>> {
        if self.is_closed() {
            return Err(DriverError::PageClosed);
        }
        let page = Arc::new(StubPage::new(self.delay));
        self.pages.lock().unwrap().push(page.clone());
        Ok(page)
    }

    async fn close(&self) -> DriverResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct PageState {
    history: Vec<String>,
    index: usize,
    title: String,
}

pub struct StubPage {
    delay: Duration,
    closed: AtomicBool,
    state: Mutex<PageState>,
    /// Pre-programmed titles keyed by (normalized) URL.
    titles: Mutex<HashMap<String, String>>,
    eval_result: Mutex<Value>,
    ops: Mutex<Vec<String>>,
    console_tx: Mutex<Option<mpsc::Sender<ConsoleEvent>>>,
    network_tx: Mutex<Option<mpsc::Sender<NetworkEvent>>>,
    streams: Mutex<Option<(mpsc::Receiver<ConsoleEvent>, mpsc::Receiver<NetworkEvent>)>>,
}

impl StubPage {
    fn new(delay: Duration) -> Self {
        let (console_tx, console_rx) = mpsc::channel(STUB_CHANNEL_CAPACITY);
        let (network_tx, network_rx) = mpsc::channel(STUB_CHANNEL_CAPACITY);
        Self {
            delay,
            closed: AtomicBool::new(false),
            state: Mutex::new(PageState {
                history: vec!["about:blank".to_string()],
                index: 0,
                title: String::new(),
            }),
            titles: Mutex::new(HashMap::new()),
            eval_result: Mutex::new(Value::Null),
            ops: Mutex::new(Vec::new()),
            console_tx: Mutex::new(Some(console_tx)),
            network_tx: Mutex::new(Some(network_tx)),
            streams: Mutex::new(Some((console_rx, network_rx))),
        }
    }

    /// The recorded operation log (`"<op>:start"` / `"<op>:end"` pairs).
    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    pub fn program_title(&self, url: &str, title: &str) {
        self.titles
            .lock()
            .unwrap()
            .insert(normalize_url(url), title.to_string());
    }

    pub fn set_eval_result(&self, value: Value) {
        *self.eval_result.lock().unwrap() = value;
    }

    pub async fn emit_console(&self, kind: ConsoleKind, text: &str) {
        let tx = self.console_tx.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx
                .send(ConsoleEvent {
                    ts: Utc::now(),
                    kind,
                    text: text.to_string(),
                    location: None,
                    args: Vec::new(),
                })
                .await;
        }
    }

    pub async fn emit_network(&self, event: NetworkEvent) {
        let tx = self.network_tx.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }

    async fn op(&self, name: &str) -> DriverResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::PageClosed);
        }
        self.ops.lock().unwrap().push(format!("{name}:start"));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.ops.lock().unwrap().push(format!("{name}:end"));
        Ok(())
    }

    fn current_url(&self) -> String {
        let state = self.state.lock().unwrap();
        state.history[state.index].clone()
    }
}

/// Mimic a real browser's URL normalization: a bare origin gains "/".
fn normalize_url(url: &str) -> String {
    for scheme in ["https://", "http://"] {
        if let Some(rest) = url.strip_prefix(scheme) {
            if !rest.contains('/') {
                return format!("{url}/");
            }
        }
    }
    url.to_string()
}

#[async_trait]
impl PageHandle for StubPage {
    async fn goto(&self, url: &str, _wait_until: Option<&str>) -> DriverResult<String> {
        self.op("goto").await?;
        let url = normalize_url(url);
        let title = self.titles.lock().unwrap().get(&url).cloned();
        let mut state = self.state.lock().unwrap();
        let new_len = state.index + 1;
        state.history.truncate(new_len);
        state.history.push(url.clone());
        state.index = state.history.len() - 1;
        if let Some(title) = title {
            state.title = title;
        }
        Ok(url)
    }

    async fn click(&self, selector: &str) -> DriverResult<()> {
        if selector == MISSING_SELECTOR {
            return Err(DriverError::ElementNotFound(selector.to_string()));
        }
        self.op("click").await
    }

    async fn click_at(&self, x: f64, y: f64) -> DriverResult<()> {
        self.op(&format!("click_at({x},{y})")).await
    }

    async fn fill(&self, selector: &str, _value: &str) -> DriverResult<()> {
        if selector == MISSING_SELECTOR {
            return Err(DriverError::ElementNotFound(selector.to_string()));
        }
        self.op("fill").await
    }

    async fn type_text(&self, _selector: Option<&str>, _text: &str) -> DriverResult<()> {
        self.op("type").await
    }

    async fn press(&self, _selector: Option<&str>, _key: &str) -> DriverResult<()> {
        self.op("press").await
    }

    async fn select_option(&self, _selector: &str, _value: &str) -> DriverResult<()> {
        self.op("select_option").await
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        _state: &str,
        _timeout: Duration,
    ) -> DriverResult<()> {
        if selector == MISSING_SELECTOR {
            return Err(DriverError::ElementNotFound(selector.to_string()));
        }
        self.op("wait_for_selector").await
    }

    async fn wait_for_load_state(&self, _state: &str, _timeout: Duration) -> DriverResult<()> {
        self.op("wait_for_load_state").await
    }

    async fn screenshot(
        &self,
        format: ScreenshotFormat,
        _full_page: bool,
    ) -> DriverResult<Vec<u8>> {
        self.op("screenshot").await?;
        let img = image::RgbaImage::from_pixel(64, 48, image::Rgba([32, 32, 32, 255]));
        let mut bytes = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut bytes);
        let fmt = match format {
            ScreenshotFormat::Png => image::ImageFormat::Png,
            ScreenshotFormat::Jpeg { .. } => image::ImageFormat::Jpeg,
        };
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut cursor, fmt)
            .map_err(|e| DriverError::Backend(e.to_string()))?;
        Ok(bytes)
    }

    async fn evaluate(&self, _expression: &str) -> DriverResult<Value> {
        self.op("evaluate").await?;
        Ok(self.eval_result.lock().unwrap().clone())
    }

    async fn url(&self) -> DriverResult<String> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::PageClosed);
        }
        Ok(self.current_url())
    }

    async fn title(&self) -> DriverResult<String> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::PageClosed);
        }
        Ok(self.state.lock().unwrap().title.clone())
    }

    async fn viewport(&self) -> DriverResult<ViewportSize> {
        Ok(ViewportSize {
            width: 1280,
            height: 720,
        })
    }

    async fn reload(&self) -> DriverResult<String> {
        self.op("reload").await?;
        Ok(self.current_url())
    }

    async fn back(&self) -> DriverResult<String> {
        self.op("back").await?;
        let mut state = self.state.lock().unwrap();
        if state.index > 0 {
            state.index -= 1;
        }
        Ok(state.history[state.index].clone())
    }

    async fn forward(&self) -> DriverResult<String> {
        self.op("forward").await?;
        let mut state = self.state.lock().unwrap();
        if state.index + 1 < state.history.len() {
            state.index += 1;
        }
        Ok(state.history[state.index].clone())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn subscribe(&self) -> DriverResult<EventStreams> {
        let (console, network) = self
            .streams
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| DriverError::Backend("page already subscribed".into()))?;
        Ok(EventStreams {
            console,
            network,
            forwarders: Vec::new(),
        })
    }

    async fn close(&self) -> DriverResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the senders ends the capture consumers.
        self.console_tx.lock().unwrap().take();
        self.network_tx.lock().unwrap().take();
        Ok(())
    }
}
