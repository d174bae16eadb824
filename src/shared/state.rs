use crate::config::AppConfig;
use crate::shared::error::ApiError;
use crate::shared::utils::DbPool;
use diesel::r2d2::{ConnectionManager, PooledConnection};
use diesel::PgConnection;

/// Shared application state, constructed once in `main` and injected into
/// every handler and background task. Owns the connection pool for the
/// lifetime of the process.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub conn: DbPool,
}

impl AppState {
    pub fn new(config: AppConfig, conn: DbPool) -> Self {
        Self { config, conn }
    }

    pub fn db(&self) -> Result<PooledConnection<ConnectionManager<PgConnection>>, ApiError> {
        self.conn
            .get()
            .map_err(|e| ApiError::Database(format!("Failed to acquire connection: {}", e)))
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("conn", &"DbPool")
            .finish()
    }
}
