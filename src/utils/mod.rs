pub mod clock;
pub mod metrics;

// Re-export commonly used items
pub use clock::{RecordingSleeper, Sleeper, TokioSleeper};
pub use metrics::Metrics;
