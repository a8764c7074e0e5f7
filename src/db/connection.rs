use std::path::{Path, PathBuf};

use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type DbPooledConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Database connection pool wrapper shared across the web server, the
/// channel manager, and the one-off CLI subcommands (import, validate).
pub struct DbConnection {
    pool: DbPool,
}

impl DbConnection {
    /// Create a new database connection pool
    pub fn new(database_url: String) -> Result<Self, Box<dyn std::error::Error>> {
        let manager = ConnectionManager::<SqliteConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(16)
            .connection_customizer(Box::new(BusyTimeoutCustomizer))
            .build(manager)
            .map_err(|e| format!("Failed to create connection pool: {}", e))?;

        Ok(Self { pool })
    }

    /// Get a pooled connection from the pool
    pub fn get_connection(&self) -> Result<DbPooledConnection, Box<dyn std::error::Error>> {
        self.pool
            .get()
            .map_err(|e| format!("Failed to get connection from pool: {}", e).into())
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

/// Resolve the default database path under the platform data directory,
/// creating the parent directory if it doesn't exist yet. Used when the
/// config file doesn't set `database_path` explicitly.
pub fn default_db_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
    let data_dir = dirs::data_dir()
        .ok_or("Cannot determine platform data directory")?
        .join("streamtv");

    std::fs::create_dir_all(&data_dir).map_err(|e| {
        format!(
            "Cannot create database directory at '{}': {}. Please check folder permissions.",
            data_dir.display(),
            e
        )
    })?;

    Ok(data_dir.join("streamtv.db"))
}

/// Build a `sqlite://` connection URL from a filesystem path.
pub fn database_url_for(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Applies the same `busy_timeout` pragma `establish_connection` sets on
/// the one-off migration connection to every connection the pool hands
/// out, so concurrent channel/EPG/API access never trips `SQLITE_BUSY`.
#[derive(Debug)]
struct BusyTimeoutCustomizer;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for BusyTimeoutCustomizer {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        diesel::sql_query("PRAGMA busy_timeout = 5000")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;
        Ok(())
    }
}

/// Establish a connection to the SQLite database with busy timeout
pub fn establish_connection(
    database_url: &str,
) -> Result<SqliteConnection, diesel::ConnectionError> {
    let mut conn = SqliteConnection::establish(database_url)?;

    // Set busy timeout to 5 seconds to handle concurrent access gracefully
    diesel::sql_query("PRAGMA busy_timeout = 5000")
        .execute(&mut conn)
        .map_err(|e| {
            diesel::ConnectionError::BadConnection(format!("Failed to set busy_timeout: {}", e))
        })?;

    Ok(conn)
}

/// Run all pending migrations
pub fn run_migrations(
    conn: &mut SqliteConnection,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    conn.run_pending_migrations(MIGRATIONS)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_connection_runs_migrations() {
        let mut conn = establish_connection(":memory:").expect("connect");
        run_migrations(&mut conn).expect("migrate");
    }
}
