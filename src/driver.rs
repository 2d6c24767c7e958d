//! Narrow interface to the browser-automation backend.
//!
//! The core of the server is written entirely against these traits. The
//! concrete implementation in [`chromium`] wraps chromiumoxide; the
//! deterministic stub in [`testing`] backs the test suites so nothing
//! above this seam ever needs a real browser.

pub mod chromium;
#[cfg(test)]
pub mod testing;

use crate::logs::{ConsoleEvent, NetworkEvent};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Supported browser kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserKind {
    Chromium,
    Firefox,
    Webkit,
}

impl BrowserKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "chromium" => Some(Self::Chromium),
            "firefox" => Some(Self::Firefox),
            "webkit" => Some(Self::Webkit),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chromium => "chromium",
            Self::Firefox => "firefox",
            Self::Webkit => "webkit",
        }
    }
}

/// Requested screenshot encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenshotFormat {
    Png,
    Jpeg { quality: Option<u8> },
}

/// Page viewport dimensions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ViewportSize {
    pub width: u32,
    pub height: u32,
}

/// Errors surfaced by a driver, already classified so the dispatcher can
/// translate them into the client-facing taxonomy without string matching.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("no element matches {0}")]
    ElementNotFound(String),

    #[error("navigation interrupted: {0}")]
    NavigationInterrupted(String),

    #[error("page is closed")]
    PageClosed,

    #[error("launch failed: {0}")]
    LaunchFailed(String),

    #[error("{0}")]
    Backend(String),
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Typed event channels for one page, plus the forwarder tasks feeding
/// them. The receivers are drained by the capture component; aborting the
/// tasks detaches the subscription.
pub struct EventStreams {
    pub console: mpsc::Receiver<ConsoleEvent>,
    pub network: mpsc::Receiver<NetworkEvent>,
    pub forwarders: Vec<JoinHandle<()>>,
}

/// Launches browser instances of a given kind.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(
        &self,
        kind: BrowserKind,
        headless: bool,
        session_id: &str,
    ) -> DriverResult<Arc<dyn BrowserHandle>>;
}

/// One live browser instance with its isolated profile.
#[async_trait]
pub trait BrowserHandle: Send + Sync {
    /// Open a new blank page.
    async fn new_page(&self) -> DriverResult<Arc<dyn PageHandle>>;

    /// Tear the browser down. Idempotent.
    async fn close(&self) -> DriverResult<()>;
}

/// One live page. Navigation methods return the page's URL afterwards.
#[async_trait]
pub trait PageHandle: Send + Sync {
    async fn goto(&self, url: &str, wait_until: Option<&str>) -> DriverResult<String>;
    async fn click(&self, selector: &str) -> DriverResult<()>;
    async fn click_at(&self, x: f64, y: f64) -> DriverResult<()>;
    async fn fill(&self, selector: &str, value: &str) -> DriverResult<()>;
    /// `selector` of `None` types into the focused element.
    async fn type_text(&self, selector: Option<&str>, text: &str) -> DriverResult<()>;
    /// `selector` of `None` presses on the focused element.
    async fn press(&self, selector: Option<&str>, key: &str) -> DriverResult<()>;
    async fn select_option(&self, selector: &str, value: &str) -> DriverResult<()>;
    async fn wait_for_selector(
        &self,
        selector: &str,
        state: &str,
        timeout: Duration,
    ) -> DriverResult<()>;
    async fn wait_for_load_state(&self, state: &str, timeout: Duration) -> DriverResult<()>;
    async fn screenshot(&self, format: ScreenshotFormat, full_page: bool) -> DriverResult<Vec<u8>>;
    async fn evaluate(&self, expression: &str) -> DriverResult<serde_json::Value>;
    async fn url(&self) -> DriverResult<String>;
    async fn title(&self) -> DriverResult<String>;
    async fn viewport(&self) -> DriverResult<ViewportSize>;
    async fn reload(&self) -> DriverResult<String>;
    async fn back(&self) -> DriverResult<String>;
    async fn forward(&self) -> DriverResult<String>;

    /// Whether the backend has closed this page. Observed lazily; the
    /// registry surfaces it as `PageGone` on the next access.
    fn is_closed(&self) -> bool;

    /// Subscribe the console and network event channels. Called once per
    /// page, right after creation.
    async fn subscribe(&self) -> DriverResult<EventStreams>;

    async fn close(&self) -> DriverResult<()>;
}
