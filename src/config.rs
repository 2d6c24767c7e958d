//! Environment-driven server configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Default Gemini endpoint for the vision adapter.
const DEFAULT_VISION_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Maximum concurrent browser sessions.
    pub max_sessions: usize,
    /// Maximum pages per session.
    pub max_pages_per_session: usize,
    /// Sessions idle longer than this are evicted by the sweeper.
    pub idle_timeout: Duration,
    /// Directory for screenshots taken with a relative `path` argument.
    pub screenshot_dir: PathBuf,
    /// Optional bearer token required on every request when set.
    pub api_key: Option<String>,
    /// Effective timeout for a command unless overridden per call.
    pub default_command_timeout: Duration,
    /// Whether unrecognized one-line commands may fall back to JavaScript
    /// evaluation.
    pub allow_js_fallback: bool,
    /// Upper bound on a single backend close during shutdown or eviction.
    pub close_timeout: Duration,
    /// Base URL of the vision model endpoint.
    pub vision_base_url: String,
    /// Vision model name.
    pub vision_model: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            host: env_or("HOST", "0.0.0.0"),
            port: env_parsed("PORT", 8000),
            max_sessions: env_parsed("MAX_SESSIONS", 10),
            max_pages_per_session: env_parsed("MAX_PAGES_PER_SESSION", 20),
            idle_timeout: Duration::from_secs(env_parsed("SESSION_IDLE_TIMEOUT_SEC", 3600)),
            screenshot_dir: PathBuf::from(env_or("SCREENSHOT_DIR", "/tmp")),
            api_key: std::env::var("API_KEY").ok().filter(|k| !k.is_empty()),
            default_command_timeout: Duration::from_millis(env_parsed(
                "DEFAULT_COMMAND_TIMEOUT_MS",
                30_000,
            )),
            allow_js_fallback: env_parsed("ALLOW_JS_FALLBACK", true),
            close_timeout: Duration::from_secs(env_parsed("CLOSE_TIMEOUT_SEC", 10)),
            vision_base_url: env_or("VISION_BASE_URL", DEFAULT_VISION_BASE_URL),
            vision_model: env_or("VISION_MODEL", "gemini-2.5-flash"),
        }
    }

    /// Eviction sweep cadence: frequent enough to honor short timeouts,
    /// capped at five minutes for the default one-hour timeout.
    pub fn sweep_interval(&self) -> Duration {
        self.idle_timeout
            .clamp(Duration::from_secs(1), Duration::from_secs(300))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            max_sessions: 10,
            max_pages_per_session: 20,
            idle_timeout: Duration::from_secs(3600),
            screenshot_dir: PathBuf::from("/tmp"),
            api_key: None,
            default_command_timeout: Duration::from_millis(30_000),
            allow_js_fallback: true,
            close_timeout: Duration::from_secs(10),
            vision_base_url: DEFAULT_VISION_BASE_URL.to_string(),
            vision_model: "gemini-2.5-flash".to_string(),
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
