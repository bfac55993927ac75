//! Engine construction.
//!
//! Dispatch over `EngineType` is an exhaustive `match`: adding a new
//! engine variant without teaching the factory about it fails to compile
//! instead of failing at runtime.

use tracing::debug;

use super::columnar::ColumnarEngine;
use super::relational::RelationalEngine;
use super::StorageEngine;
use crate::config::{EngineType, StorageConfig};
use crate::error::{StorageError, StorageResult};

/// Externally-owned connections that bypass scalar config validation.
///
/// When the matching handle is present, the engine adopts it and never
/// closes it; connection settings in `StorageConfig` are then ignored and
/// their validation is the injecting caller's responsibility. The table
/// name is still validated, since it is interpolated into SQL as an
/// identifier.
#[derive(Default)]
pub struct EngineOptions {
    /// Pool for the relational engine.
    pub pg_pool: Option<sqlx::PgPool>,
    /// Client for the columnar engine.
    pub clickhouse_client: Option<clickhouse::Client>,
}

impl EngineOptions {
    /// Options without any injected connection.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Injects an externally-owned Postgres pool.
    #[must_use]
    pub fn with_pg_pool(mut self, pool: sqlx::PgPool) -> Self {
        self.pg_pool = Some(pool);
        self
    }

    /// Injects an externally-owned ClickHouse client.
    #[must_use]
    pub fn with_clickhouse_client(mut self, client: clickhouse::Client) -> Self {
        self.clickhouse_client = Some(client);
        self
    }
}

/// Builds the concrete engine for an engine type.
///
/// # Errors
///
/// Returns a configuration error when scalar settings are invalid (and no
/// connection was injected), when the table name is unsafe, or when the
/// engine type is reserved but not yet implemented.
pub fn create_engine(
    engine_type: EngineType,
    config: StorageConfig,
    options: EngineOptions,
) -> StorageResult<Box<dyn StorageEngine>> {
    debug!(engine = %engine_type, table = %config.table, "creating storage engine");
    match engine_type {
        EngineType::Relational => {
            if let Some(pool) = options.pg_pool {
                config.validate_table()?;
                Ok(Box::new(RelationalEngine::with_pool(config, pool)))
            } else {
                config.validate()?;
                Ok(Box::new(RelationalEngine::new(config)))
            }
        }
        EngineType::Columnar => {
            if let Some(client) = options.clickhouse_client {
                config.validate_table()?;
                Ok(Box::new(ColumnarEngine::with_client(config, client)))
            } else {
                config.validate()?;
                Ok(Box::new(ColumnarEngine::new(config)))
            }
        }
        EngineType::Search => Err(StorageError::EngineNotImplemented(EngineType::Search)),
    }
}
