// OAuth client-credentials token handling
pub mod auth;

// TOML configuration
pub mod config;

// Field-name table and record flattening
pub mod mapping;

// Export and search drains against the vendor API
pub mod retrieval;

// Interval scheduler and window bookkeeping
pub mod poller;

// Downstream event publishing
pub mod sink;

pub use mapping::{FieldMap, FlatRecord, RecordFlattener};
pub use poller::{CycleOutcome, Poller, PollerStatus};
pub use retrieval::{EventType, RetrievalEngine, RetrievalError, RetrievalMode, TimeWindow};
pub use sink::{EventSink, SinkEvent};
