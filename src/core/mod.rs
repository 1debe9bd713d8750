pub mod config;
pub mod errors;
pub mod types;

// Re-export commonly used items for convenience
pub use config::Config;
pub use errors::{
    ConfigError, ErrorKind, GateError, ItemFailure, PipelineError, ServiceError, StoreError,
};
pub use types::{
    BatchReport, ChainReport, CompetitorCandidate, FieldCompletion, FieldSource, FieldValue, Item,
    ItemId, PhaseName, PhaseOutput, PhaseResult, Selection, SelectionDecision,
};
