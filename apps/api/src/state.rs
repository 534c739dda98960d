use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use crate::analysis::session::SessionStore;
use crate::config::Config;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// One pooled HTTP client shared by every provider call.
    pub http: Client,
    pub sessions: Arc<SessionStore>,
}

impl AppState {
    pub fn new(config: Config, http: Client) -> Self {
        let sessions = SessionStore::with_limits(
            config.session_capacity,
            Duration::from_secs(config.session_ttl_secs),
        );
        Self {
            config,
            http,
            sessions: Arc::new(sessions),
        }
    }
}
