//! Storage backends for procurement data, alerts and the audit trail
//!
//! ## Design
//!
//! - **Trait-based**: `StorageBackend` lets the pipeline run against
//!   PostgreSQL in production and an in-memory store in tests
//! - **Async**: All operations are async for compatibility with the Tokio worker
//! - **Injected**: Services receive an `Arc<dyn StorageBackend>`; there is no
//!   global connection
//!
//! ## Backends
//!
//! - **PostgreSQL** (default feature `storage-postgres`)
//! - **In-Memory**: No persistence, supports fault injection
//!
//! ## Usage
//!
//! ```no_run
//! use procurement_lighthouse::config::DatabaseConfig;
//! use procurement_lighthouse::storage::postgres::PostgresBackend;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = PostgresBackend::connect(&DatabaseConfig::default()).await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
#[cfg(feature = "storage-postgres")]
pub mod postgres;
pub mod schema;

pub use backend::{ActiveAlertCount, HealthStatus, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use memory::{MemoryBackend, StorageOp};
pub use schema::{
    EventLogEntry, InventoryItem, LineItem, MetricSample, OrderStatus, PurchaseOrder, ReceivedLine,
};
