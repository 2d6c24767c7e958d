//! Page registry: page id → live page entry.

use crate::capture::Capture;
use crate::driver::PageHandle;
use crate::error::ServerError;
use crate::ids;
use crate::logs::{ConsoleEvent, NetworkEvent, RingBuffer, CONSOLE_CAPACITY, NETWORK_CAPACITY};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// One live page and everything attached to it.
pub struct PageEntry {
    pub id: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub handle: Arc<dyn PageHandle>,
    pub console: Arc<RingBuffer<ConsoleEvent>>,
    pub network: Arc<RingBuffer<NetworkEvent>>,
    /// Serializes command execution on this page. Capture never takes it.
    pub gate: Mutex<()>,
    capture: Capture,
}

impl std::fmt::Debug for PageEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageEntry")
            .field("id", &self.id)
            .field("session_id", &self.session_id)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Global page index. Locks are short-lived: entries are `Arc`-borrowed
/// out and all driver calls happen with the map lock released.
pub struct PageRegistry {
    pages: RwLock<HashMap<String, Arc<PageEntry>>>,
}

impl PageRegistry {
    pub fn new() -> Self {
        Self {
            pages: RwLock::new(HashMap::new()),
        }
    }

    /// Register a freshly created page, installing its capture hooks, and
    /// return its allocated id.
    pub async fn register(
        &self,
        session_id: &str,
        handle: Arc<dyn PageHandle>,
    ) -> Result<String, ServerError> {
        let console = Arc::new(RingBuffer::new(CONSOLE_CAPACITY));
        let network = Arc::new(RingBuffer::new(NETWORK_CAPACITY));

        let candidate = {
            let pages = self.pages.read().await;
            let live: HashSet<String> = pages.keys().cloned().collect();
            ids::allocate(&live)
        };

        // Hooks go in before the first navigation; the backend
        // subscription happens with the map lock released.
        let capture = Capture::install(&handle, &candidate, console.clone(), network.clone())
            .await
            .map_err(|e| ServerError::BackendError(e.to_string()))?;

        let mut pages = self.pages.write().await;
        let id = if pages.contains_key(&candidate) {
            let live: HashSet<String> = pages.keys().cloned().collect();
            ids::allocate(&live)
        } else {
            candidate
        };

        let entry = Arc::new(PageEntry {
            id: id.clone(),
            session_id: session_id.to_string(),
            created_at: Utc::now(),
            handle,
            console,
            network,
            gate: Mutex::new(()),
            capture,
        });
        pages.insert(id.clone(), entry);
        Ok(id)
    }

    /// Look up a live page. `PageNotFound` when absent, `PageGone` when
    /// the backend has closed it underneath us.
    pub async fn lookup(&self, page_id: &str) -> Result<Arc<PageEntry>, ServerError> {
        let entry = self
            .pages
            .read()
            .await
            .get(page_id)
            .cloned()
            .ok_or_else(|| ServerError::PageNotFound(page_id.to_string()))?;
        if entry.handle.is_closed() {
            return Err(ServerError::PageGone(page_id.to_string()));
        }
        Ok(entry)
    }

    /// Fetch the entry even when the backend page is gone; used by
    /// deletion paths that must clean up regardless.
    pub async fn get(&self, page_id: &str) -> Option<Arc<PageEntry>> {
        self.pages.read().await.get(page_id).cloned()
    }

    /// Remove and tear down a page: close the backend page, detach the
    /// capture hooks, clear the ring buffers. The command gate is taken
    /// first so an in-flight command finishes before the page vanishes.
    pub async fn remove(&self, page_id: &str) -> Result<Arc<PageEntry>, ServerError> {
        let entry = {
            let mut pages = self.pages.write().await;
            pages
                .remove(page_id)
                .ok_or_else(|| ServerError::PageNotFound(page_id.to_string()))?
        };

        let _gate = entry.gate.lock().await;
        if let Err(e) = entry.handle.close().await {
            tracing::warn!(page_id, error = %e, "Backend page close failed");
        }
        entry.capture.detach();
        entry.console.clear();
        entry.network.clear();
        drop(_gate);
        Ok(entry)
    }

    pub async fn len(&self) -> usize {
        self.pages.read().await.len()
    }
}

impl Default for PageRegistry {
    fn default() -> Self {
        Self::new()
    }
}
