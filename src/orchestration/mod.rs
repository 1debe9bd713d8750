pub mod batch_orchestrator;
pub mod chunked_runner;
pub mod enrichment_merger;
pub mod selection_gate;

pub use batch_orchestrator::BatchOrchestrator;
pub use chunked_runner::{ChunkedRunner, ConcurrencyPolicy, ProgressFn};
pub use enrichment_merger::EnrichmentMerger;
pub use selection_gate::{PendingSelection, SelectionGate};
