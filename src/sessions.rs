//! Session manager: owns browser instances, spawns and closes pages,
//! evicts idle sessions.

use crate::config::Config;
use crate::driver::{BrowserHandle, BrowserKind, DriverError, Launcher, PageHandle};
use crate::error::ServerError;
use crate::ids;
use crate::registry::PageRegistry;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::RwLock;
// tokio's Instant so idle tracking follows the (possibly paused) runtime
// clock that the sweeper's interval runs on.
use tokio::time::Instant;

/// Sentinel values for pages whose URL/title reads fail transiently.
const UNKNOWN_URL: &str = "Unknown";
const UNREADABLE_TITLE: &str = "Error accessing page";
const CLOSED_TITLE: &str = "Closed";

/// Budget for best-effort URL/title reads during session listing.
const LIST_READ_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);

/// One live session: a browser instance plus its child pages.
pub struct Session {
    pub id: String,
    pub kind: BrowserKind,
    pub headless: bool,
    pub created_at: DateTime<Utc>,
    pub browser: Arc<dyn BrowserHandle>,
    /// Refreshed by every successful command dispatch on any child page.
    last_accessed: StdMutex<Instant>,
    page_ids: StdMutex<HashSet<String>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("headless", &self.headless)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl Session {
    fn idle_for(&self) -> std::time::Duration {
        self.last_accessed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }

    fn touch(&self) {
        *self
            .last_accessed
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    fn page_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .page_ids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

/// Per-page line in a session summary.
#[derive(Debug, Clone, Serialize)]
pub struct PageSummary {
    pub id: String,
    pub url: String,
    pub title: String,
}

/// One line of `ListSessions` output.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub kind: String,
    pub headless: bool,
    pub pages: Vec<PageSummary>,
}

pub struct SessionManager {
    cfg: Arc<Config>,
    launcher: Arc<dyn Launcher>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    registry: PageRegistry,
}

impl SessionManager {
    /// Create the manager and start the idle-eviction sweeper.
    pub fn start(cfg: Arc<Config>, launcher: Arc<dyn Launcher>) -> Arc<Self> {
        let manager = Arc::new(Self {
            cfg: cfg.clone(),
            launcher,
            sessions: RwLock::new(HashMap::new()),
            registry: PageRegistry::new(),
        });

        // Weak reference so the sweeper exits when the manager is dropped.
        let weak = Arc::downgrade(&manager);
        let sweep = cfg.sweep_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep);
            interval.tick().await; // first tick fires immediately; skip it
            loop {
                interval.tick().await;
                match weak.upgrade() {
                    Some(manager) => manager.evict_idle().await,
                    None => {
                        tracing::debug!("SessionManager dropped, sweeper exiting");
                        break;
                    }
                }
            }
        });

        manager
    }

    pub fn registry(&self) -> &PageRegistry {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Launch a browser of `kind` and register the session.
    pub async fn create_session(
        &self,
        kind: &str,
        headless: bool,
    ) -> Result<Arc<Session>, ServerError> {
        let kind = BrowserKind::parse(kind)
            .ok_or_else(|| ServerError::InvalidBrowserKind(kind.to_string()))?;

        // Fast-fail before paying for a launch; re-checked under the
        // write lock below.
        if self.sessions.read().await.len() >= self.cfg.max_sessions {
            return Err(self.session_capacity_error());
        }

        let candidate = {
            let sessions = self.sessions.read().await;
            let live: HashSet<String> = sessions.keys().cloned().collect();
            ids::allocate(&live)
        };

        let browser = self
            .launcher
            .launch(kind, headless, &candidate)
            .await
            .map_err(|e| ServerError::BackendLaunchFailed(e.to_string()))?;

        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.cfg.max_sessions {
            drop(sessions);
            self.close_browser(&candidate, &browser).await;
            return Err(self.session_capacity_error());
        }
        let id = if sessions.contains_key(&candidate) {
            let live: HashSet<String> = sessions.keys().cloned().collect();
            ids::allocate(&live)
        } else {
            candidate
        };

        let session = Arc::new(Session {
            id: id.clone(),
            kind,
            headless,
            created_at: Utc::now(),
            browser,
            last_accessed: StdMutex::new(Instant::now()),
            page_ids: StdMutex::new(HashSet::new()),
        });
        sessions.insert(id.clone(), session.clone());
        tracing::info!(session_id = %id, kind = kind.as_str(), headless, "Created session");
        Ok(session)
    }

    pub async fn get_session(&self, id: &str) -> Result<Arc<Session>, ServerError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ServerError::SessionNotFound(id.to_string()))
    }

    /// Open a page in `session_id`'s browser, install capture hooks, and
    /// optionally navigate it.
    pub async fn create_page(
        &self,
        session_id: &str,
        url: Option<&str>,
    ) -> Result<String, ServerError> {
        let session = self.get_session(session_id).await?;

        {
            let pages = session.page_ids.lock().unwrap_or_else(|e| e.into_inner());
            if pages.len() >= self.cfg.max_pages_per_session {
                return Err(ServerError::CapacityExceeded(format!(
                    "session {session_id} is at its page limit ({})",
                    self.cfg.max_pages_per_session
                )));
            }
        }

        let handle = session.browser.new_page().await.map_err(|e| match e {
            DriverError::LaunchFailed(m) => ServerError::BackendLaunchFailed(m),
            other => ServerError::BackendLaunchFailed(other.to_string()),
        })?;

        let page_id = self.registry.register(session_id, handle.clone()).await?;
        session
            .page_ids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(page_id.clone());

        if let Some(url) = url {
            if let Err(e) = handle.goto(url, None).await {
                // Initial navigation failed; don't leave a half-made page.
                let _ = self.registry.remove(&page_id).await;
                session
                    .page_ids
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&page_id);
                return Err(crate::command::driver_error(&page_id, e));
            }
        }

        session.touch();
        tracing::info!(session_id, page_id = %page_id, "Created page");
        Ok(page_id)
    }

    /// Best-effort session listing. Pages whose URL/title reads fail are
    /// reported with sentinel strings rather than failing the call.
    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(sessions.len());
        for session in sessions {
            let mut pages = Vec::new();
            for page_id in session.page_ids() {
                let Some(entry) = self.registry.get(&page_id).await else {
                    continue;
                };
                let summary = if entry.handle.is_closed() {
                    PageSummary {
                        id: page_id,
                        url: UNKNOWN_URL.to_string(),
                        title: CLOSED_TITLE.to_string(),
                    }
                } else {
                    let url = tokio::time::timeout(LIST_READ_TIMEOUT, entry.handle.url())
                        .await
                        .ok()
                        .and_then(Result::ok)
                        .unwrap_or_else(|| UNKNOWN_URL.to_string());
                    let title = tokio::time::timeout(LIST_READ_TIMEOUT, entry.handle.title())
                        .await
                        .ok()
                        .and_then(Result::ok)
                        .unwrap_or_else(|| UNREADABLE_TITLE.to_string());
                    PageSummary {
                        id: page_id,
                        url,
                        title,
                    }
                };
                pages.push(summary);
            }
            out.push(SessionSummary {
                id: session.id.clone(),
                created_at: session.created_at,
                kind: session.kind.as_str().to_string(),
                headless: session.headless,
                pages,
            });
        }
        out.sort_by_key(|s| s.created_at);
        out
    }

    /// Close every child page, then the browser. The second delete of the
    /// same id reports `SessionNotFound`.
    pub async fn delete_session(&self, id: &str) -> Result<(), ServerError> {
        // Short exclusive hold: after this, lookups fail and the long
        // backend closes happen outside any map lock.
        let session = self
            .sessions
            .write()
            .await
            .remove(id)
            .ok_or_else(|| ServerError::SessionNotFound(id.to_string()))?;

        for page_id in session.page_ids() {
            if let Err(e) = self.registry.remove(&page_id).await {
                tracing::warn!(session_id = %id, page_id = %page_id, error = %e,
                    "Page teardown failed during session delete");
            }
        }

        self.close_browser(id, &session.browser).await;
        tracing::info!(session_id = %id, "Deleted session");
        Ok(())
    }

    /// Delete a single page from its session.
    pub async fn delete_page(&self, page_id: &str) -> Result<(), ServerError> {
        let entry = self.registry.remove(page_id).await?;
        if let Ok(session) = self.get_session(&entry.session_id).await {
            session
                .page_ids
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(page_id);
        }
        Ok(())
    }

    /// Refresh a session's idle clock. Missing sessions are ignored: the
    /// command that triggered the touch already finished against a page
    /// that was live when it started.
    pub async fn touch(&self, session_id: &str) {
        if let Some(session) = self.sessions.read().await.get(session_id) {
            session.touch();
        }
    }

    /// (live sessions, live pages) for the health endpoint.
    pub async fn counts(&self) -> (usize, usize) {
        (self.sessions.read().await.len(), self.registry.len().await)
    }

    /// Tear down every session; per-close failures are logged only.
    pub async fn shutdown_all(&self) {
        let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        if ids.is_empty() {
            return;
        }
        tracing::info!(count = ids.len(), "Shutting down all sessions");
        for id in ids {
            if let Err(e) = self.delete_session(&id).await {
                tracing::warn!(session_id = %id, error = %e, "Session close failed at shutdown");
            }
        }
    }

    async fn evict_idle(&self) {
        let idle: Vec<String> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .filter(|s| s.idle_for() > self.cfg.idle_timeout)
                .map(|s| s.id.clone())
                .collect()
        };
        for id in idle {
            tracing::info!(session_id = %id, "Evicting idle session");
            if let Err(e) = self.delete_session(&id).await {
                tracing::warn!(session_id = %id, error = %e, "Idle eviction failed");
            }
        }
    }

    async fn close_browser(&self, session_id: &str, browser: &Arc<dyn BrowserHandle>) {
        match tokio::time::timeout(self.cfg.close_timeout, browser.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(session_id, error = %e, "Browser close failed");
            }
            Err(_) => {
                tracing::warn!(session_id, "Browser close timed out");
            }
        }
    }

    fn session_capacity_error(&self) -> ServerError {
        ServerError::CapacityExceeded(format!(
            "maximum concurrent sessions reached ({})",
            self.cfg.max_sessions
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testing::StubLauncher;
    use std::time::Duration;

    fn manager_with(cfg: Config) -> (Arc<SessionManager>, Arc<StubLauncher>) {
        let launcher = Arc::new(StubLauncher::new());
        let manager = SessionManager::start(Arc::new(cfg), launcher.clone());
        (manager, launcher)
    }

    fn manager() -> (Arc<SessionManager>, Arc<StubLauncher>) {
        manager_with(Config::default())
    }

    #[tokio::test]
    async fn create_list_delete_roundtrip() {
        let (manager, _) = manager();
        let session = manager.create_session("chromium", true).await.unwrap();
        assert_eq!(session.id.len(), 8);

        let listed = manager.list_sessions().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].kind, "chromium");
        assert!(listed[0].headless);

        manager.delete_session(&session.id).await.unwrap();
        assert!(manager.list_sessions().await.is_empty());

        let err = manager.delete_session(&session.id).await.unwrap_err();
        assert_eq!(err.kind(), "SessionNotFound");
    }

    #[tokio::test]
    async fn unknown_browser_kind_is_rejected() {
        let (manager, _) = manager();
        let err = manager.create_session("opera", true).await.unwrap_err();
        assert_eq!(err.kind(), "InvalidBrowserKind");
    }

    #[tokio::test]
    async fn launch_failure_is_surfaced() {
        let (manager, launcher) = manager();
        launcher.fail_next_launch();
        let err = manager.create_session("chromium", true).await.unwrap_err();
        assert_eq!(err.kind(), "BackendLaunchFailed");
    }

    #[tokio::test]
    async fn session_capacity_is_enforced() {
        let (manager, _) = manager_with(Config {
            max_sessions: 1,
            ..Config::default()
        });
        manager.create_session("chromium", true).await.unwrap();
        let err = manager.create_session("chromium", true).await.unwrap_err();
        assert_eq!(err.kind(), "CapacityExceeded");
    }

    #[tokio::test]
    async fn page_capacity_is_enforced() {
        let (manager, _) = manager_with(Config {
            max_pages_per_session: 2,
            ..Config::default()
        });
        let session = manager.create_session("chromium", true).await.unwrap();
        manager.create_page(&session.id, None).await.unwrap();
        manager.create_page(&session.id, None).await.unwrap();
        let err = manager.create_page(&session.id, None).await.unwrap_err();
        assert_eq!(err.kind(), "CapacityExceeded");
    }

    #[tokio::test]
    async fn deleting_a_session_deletes_its_pages() {
        let (manager, _) = manager();
        let session = manager.create_session("chromium", true).await.unwrap();
        let p1 = manager.create_page(&session.id, None).await.unwrap();
        let p2 = manager.create_page(&session.id, None).await.unwrap();

        manager.delete_session(&session.id).await.unwrap();

        for pid in [p1, p2] {
            let err = manager.registry().lookup(&pid).await.unwrap_err();
            assert_eq!(err.kind(), "PageNotFound");
        }
        assert_eq!(manager.counts().await, (0, 0));
    }

    #[tokio::test]
    async fn listing_includes_page_urls() {
        let (manager, launcher) = manager();
        let session = manager.create_session("chromium", true).await.unwrap();
        manager
            .create_page(&session.id, Some("https://example.com"))
            .await
            .unwrap();

        let stub = launcher.launched()[0].pages()[0].clone();
        assert_eq!(stub.url().await.unwrap(), "https://example.com/");

        let listed = manager.list_sessions().await;
        assert_eq!(listed[0].pages.len(), 1);
        assert_eq!(listed[0].pages[0].url, "https://example.com/");
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sessions_are_evicted_within_a_sweep() {
        let (manager, _) = manager_with(Config {
            idle_timeout: Duration::from_secs(1),
            ..Config::default()
        });
        let session = manager.create_session("chromium", true).await.unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;

        let err = manager.get_session(&session.id).await.unwrap_err();
        assert_eq!(err.kind(), "SessionNotFound");
    }

    #[tokio::test(start_paused = true)]
    async fn touched_sessions_survive_the_sweeper() {
        let (manager, _) = manager_with(Config {
            idle_timeout: Duration::from_secs(1),
            ..Config::default()
        });
        let session = manager.create_session("chromium", true).await.unwrap();

        for _ in 0..6 {
            tokio::time::sleep(Duration::from_millis(600)).await;
            manager.touch(&session.id).await;
        }
        assert!(manager.get_session(&session.id).await.is_ok());

        tokio::time::sleep(Duration::from_secs(3)).await;
        let err = manager.get_session(&session.id).await.unwrap_err();
        assert_eq!(err.kind(), "SessionNotFound");
    }
}
