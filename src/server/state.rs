use std::sync::Arc;

use crate::channel::ChannelManager;
use crate::config::Config;
use crate::db::{DbPool, DbPooledConnection};

/// Shared application state for the HTTP server: the DB pool, the
/// resolved config, and the channel manager that owns every
/// broadcaster.
#[derive(Clone)]
pub struct AppState {
    pool: DbPool,
    config: Arc<Config>,
    manager: Arc<ChannelManager>,
}

impl AppState {
    pub fn new(pool: DbPool, config: Arc<Config>, manager: Arc<ChannelManager>) -> Self {
        Self { pool, config, manager }
    }

    pub fn get_connection(&self) -> Result<DbPooledConnection, r2d2::Error> {
        self.pool.get()
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn manager(&self) -> &Arc<ChannelManager> {
        &self.manager
    }

    /// Check `?access_token=` against the configured token. An
    /// unconfigured token means the endpoint is public (§4.7, kept for
    /// Plex compatibility).
    pub fn check_access_token(&self, provided: Option<&str>) -> bool {
        match &self.config.security.access_token {
            None => true,
            Some(expected) => provided == Some(expected.as_str()),
        }
    }

    pub fn base_url(&self, host_header: Option<&str>) -> String {
        if let Some(base) = &self.config.server.base_url {
            return base.trim_end_matches('/').to_string();
        }
        let host = host_header.unwrap_or("localhost");
        format!("http://{host}")
    }
}
