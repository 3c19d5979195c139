//! Store traits and implementations
//
// Circuit-breaker counters
pub mod counter;
//
// Cleanup scheduler state and per-artifact leases
pub mod cleanup_state;
//
// Upload records
pub mod upload;
//
// Pool setup, migrations and store construction
pub mod pool;
//
pub mod error;

pub use cleanup_state::{CleanupStateStore, MemoryCleanupStateStore, PgCleanupStateStore};
pub use counter::{CounterStore, MemoryCounterStore, PgCounterStore};
pub use error::{StoreError, StoreResult};
pub use pool::{connect, create_stores, Stores};
pub use upload::{MemoryUploadRecordStore, PgUploadRecordStore, UploadRecordStore};
