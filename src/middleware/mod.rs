// Middleware for resilient service calls
//
// Per-collaborator circuit breaking in front of the remote call executor

pub mod circuit_breaker;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
