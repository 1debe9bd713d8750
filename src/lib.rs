// Library exports for the catalog enrichment pipeline

pub mod core;
pub mod middleware;
pub mod orchestration;
pub mod phases;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use core::{
    config::Config,
    errors::{ConfigError, ErrorKind, GateError, ItemFailure, PipelineError, ServiceError, StoreError},
    types::{
        BatchReport, ChainReport, CompetitorCandidate, DeferralReason, FieldCompletion,
        FieldSource, FieldValue, Item, ItemId, ItemUpdate, MergeOutcome, PhaseName, PhaseOutput,
        PhaseResult, Progress, Selection, SelectionDecision,
    },
};

pub use middleware::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

pub use orchestration::{
    BatchOrchestrator, ChunkedRunner, ConcurrencyPolicy, EnrichmentMerger, SelectionGate,
};

pub use phases::{Collaborators, Phase, PhaseContext, PhaseSet};

pub use services::{InMemoryItemStore, ItemStore, RemoteCallExecutor, RetryPolicy};

pub use utils::{Metrics, RecordingSleeper, Sleeper, TokioSleeper};
