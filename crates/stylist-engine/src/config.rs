use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PROXY_URL: &str = "http://127.0.0.1:8080/api/proxy";
const STATE_DIR_NAME: &str = ".stylist";
const STATE_FILE_NAME: &str = "state.json";
const EVENTS_FILE_NAME: &str = "events.jsonl";

#[derive(Debug, Clone, PartialEq)]
pub struct StudioConfig {
    pub proxy_url: String,
    pub state_path: PathBuf,
    pub events_path: PathBuf,
    /// `None` leaves remote calls unbounded.
    pub request_timeout: Option<Duration>,
}

impl StudioConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(non_empty_env)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let proxy_url = lookup("STYLIST_PROXY_URL")
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_PROXY_URL.to_string());
        let state_path = lookup("STYLIST_STATE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_state_path(lookup("HOME").as_deref()));
        let events_path = lookup("STYLIST_EVENTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| sibling_events_path(&state_path));
        let request_timeout = lookup("STYLIST_PROXY_TIMEOUT_SECS")
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64);
        Self {
            proxy_url,
            state_path,
            events_path,
            request_timeout,
        }
    }

    /// Moves the state file and, unless the events path was set apart from
    /// it, the event log alongside.
    pub fn with_state_path(mut self, state_path: impl Into<PathBuf>) -> Self {
        let follows_state = self.events_path == sibling_events_path(&self.state_path);
        self.state_path = state_path.into();
        if follows_state {
            self.events_path = sibling_events_path(&self.state_path);
        }
        self
    }
}

fn default_state_path(home: Option<&str>) -> PathBuf {
    let base = home.map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    base.join(STATE_DIR_NAME).join(STATE_FILE_NAME)
}

fn sibling_events_path(state_path: &Path) -> PathBuf {
    state_path
        .parent()
        .map(|parent| parent.join(EVENTS_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(EVENTS_FILE_NAME))
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
