//! HTTP surface over the session, command, vision, and overlay cores.

mod handlers;
mod types;

pub use handlers::create_router;

use crate::command::Dispatcher;
use crate::config::Config;
use crate::sessions::SessionManager;
use crate::vision::VisionClient;
use std::sync::Arc;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionManager>,
    pub dispatcher: Arc<Dispatcher>,
    pub vision: Arc<VisionClient>,
}

impl AppState {
    pub fn new(config: Arc<Config>, sessions: Arc<SessionManager>) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(sessions.clone()));
        let vision = Arc::new(VisionClient::new(&config));
        Self {
            config,
            sessions,
            dispatcher,
            vision,
        }
    }
}
