//! Reservoir: engine-agnostic storage layer for multi-tenant log data.
//!
//! This crate is the storage core of a log observability product: a typed
//! contract for ingestion, filtered/paginated query, and time-bucketed
//! aggregation, backed interchangeably by a relational time-series engine
//! (Postgres/TimescaleDB family) or a columnar analytical engine
//! (ClickHouse family). Both backends share one validation surface and
//! identical query semantics; they differ only in the SQL their
//! translators emit.
//!
//! # Modules
//!
//! - [`models`] - Record, parameter, and result types
//! - [`translate`] - Query translators and shared validation
//! - [`engine`] - Storage engines, factory, capabilities
//! - [`cursor`] - Opaque keyset pagination cursor
//! - [`config`] - Connection configuration and engine selection
//!
//! # Example
//!
//! ```no_run
//! use reservoir::{EngineOptions, EngineType, Reservoir, StorageConfig};
//! use reservoir::models::{LogRecord, Severity};
//!
//! # async fn example() -> Result<(), reservoir::StorageError> {
//! let store = Reservoir::new(
//!     EngineType::Columnar,
//!     StorageConfig::from_env(),
//!     EngineOptions::none(),
//! )?;
//! store.initialize().await?;
//!
//! store
//!     .ingest(vec![LogRecord::new(
//!         "acme",
//!         "checkout",
//!         "payments",
//!         Severity::Info,
//!         "charge settled",
//!     )])
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod models;
mod reservoir;
pub mod translate;

pub use config::{EngineType, StorageConfig};
pub use cursor::Cursor;
pub use engine::factory::{create_engine, EngineOptions};
pub use engine::{
    EngineCapabilities, EngineState, HealthStatus, IngestResult, IngestReturningResult,
    StorageEngine, StorageSegment,
};
pub use error::{StorageError, StorageResult};
pub use reservoir::Reservoir;

/// Re-export common dependencies for convenience.
pub use chrono;
pub use serde_json;
pub use uuid;
