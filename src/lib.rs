//! StreamTV: schedules internet-hosted media into 24/7 IPTV channels
//! with XMLTV guide data and an HDHomeRun-compatible tuner surface.
//!
//! This is the library half of the binary; `main.rs` is a thin CLI
//! wrapper around [`run`].

pub mod channel;
pub mod config;
pub mod db;
pub mod epg;
pub mod logo;
pub mod schedule;
pub mod server;
pub mod source;
pub mod transcoder;

use std::sync::Arc;

use config::{Cli, Config};

/// Fatal startup error; any variant here means the process exits 1
/// before serving a single request.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("database error: {0}")]
    Database(String),
    #[error(transparent)]
    Server(#[from] server::ServerError),
}

/// Full startup sequence: load config, open the database, run
/// migrations, start every CONTINUOUS channel, then serve HTTP until
/// the caller's shutdown signal resolves.
pub async fn run(cli: Cli, shutdown: impl std::future::Future<Output = ()>) -> Result<(), StartupError> {
    let mut config = Config::load(&cli.config)?;
    config.apply_cli(&cli);
    let config = Arc::new(config);

    let db_path = config
        .database
        .path
        .clone()
        .map(Ok)
        .unwrap_or_else(db::default_db_path)
        .map_err(|e| StartupError::Database(e.to_string()))?;
    let database_url = db::database_url_for(&db_path);

    let mut conn = db::establish_connection(&database_url)
        .map_err(|e| StartupError::Database(e.to_string()))?;
    db::run_migrations(&mut conn).map_err(|e| StartupError::Database(e.to_string()))?;
    drop(conn);

    let db_connection = db::DbConnection::new(database_url)
        .map_err(|e| StartupError::Database(e.to_string()))?;
    let pool = db_connection.pool().clone();

    let manager = channel::ChannelManager::new(pool.clone(), config.clone());
    manager.start_all_channels().await;

    let state = server::AppState::new(pool, config, manager.clone());

    tokio::select! {
        result = server::start_server(state) => {
            result?;
        }
        _ = shutdown => {
            tracing::info!("shutdown signal received");
        }
    }

    manager.stop_all().await;
    Ok(())
}
