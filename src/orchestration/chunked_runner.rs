// Chunked concurrent execution of one phase across a batch of items

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::config::BatchConfig;
use crate::core::errors::{ErrorKind, ItemFailure};
use crate::core::types::{BatchReport, ItemId, PhaseResult, Progress};
use crate::utils::{Sleeper, TokioSleeper};

/// Progress observer, called once per settled item in completion order
pub type ProgressFn<'a> = dyn Fn(&Progress) + Send + Sync + 'a;

/// Parallelism per chunk and the pause between chunks
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConcurrencyPolicy {
    pub concurrency: usize,
    pub inter_chunk_delay: Duration,
}

impl ConcurrencyPolicy {
    pub fn new(concurrency: usize, inter_chunk_delay: Duration) -> Self {
        Self {
            concurrency: concurrency.max(1),
            inter_chunk_delay,
        }
    }

    pub fn from_config(config: &BatchConfig) -> Self {
        Self::new(config.concurrency, config.inter_chunk_delay)
    }
}

impl Default for ConcurrencyPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(2000))
    }
}

/// Runs a phase function over items in consecutive chunks.
///
/// Every item in a chunk is dispatched at once on its own task; the chunk
/// settles before the next begins. A failing or panicking item becomes a
/// failed PhaseResult and never affects its chunk-mates.
#[derive(Clone)]
pub struct ChunkedRunner {
    policy: ConcurrencyPolicy,
    sleeper: Arc<dyn Sleeper>,
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

impl ChunkedRunner {
    pub fn new(policy: ConcurrencyPolicy) -> Self {
        Self {
            policy,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Execute `phase_fn` for every id. Each id appears exactly once in the report.
    ///
    /// When `cancel` fires, in-flight items settle as `Cancelled`, no further
    /// chunk is launched, undispatched items are reported as `Cancelled`
    /// failures and the report is flagged `cancelled`.
    pub async fn run<T, F, Fut>(
        &self,
        phase: &str,
        item_ids: &[ItemId],
        phase_fn: F,
        on_progress: Option<&ProgressFn<'_>>,
        cancel: &CancellationToken,
    ) -> BatchReport<T>
    where
        T: Send + 'static,
        F: Fn(ItemId) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, ItemFailure>> + Send + 'static,
    {
        let started_at = Utc::now();
        let start = Instant::now();
        let total = item_ids.len();
        let chunk_count = total.div_ceil(self.policy.concurrency);
        let mut results: Vec<PhaseResult<T>> = Vec::with_capacity(total);
        let mut cancelled = false;

        for (chunk_index, chunk) in item_ids.chunks(self.policy.concurrency).enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            debug!(
                "{}: chunk {}/{} ({} items)",
                phase,
                chunk_index + 1,
                chunk_count,
                chunk.len()
            );

            let mut in_flight: FuturesUnordered<_> = chunk
                .iter()
                .map(|item_id| {
                    let item_id = item_id.clone();
                    let operation = phase_fn(item_id.clone());
                    let token = cancel.clone();
                    let handle = tokio::spawn(async move {
                        let item_start = Instant::now();
                        let outcome = tokio::select! {
                            biased;
                            _ = token.cancelled() => Err(ItemFailure::cancelled()),
                            outcome = operation => outcome,
                        };
                        (outcome, elapsed_ms(item_start))
                    });
                    async move { (item_id, handle.await) }
                })
                .collect();

            while let Some((item_id, joined)) = in_flight.next().await {
                let result = match joined {
                    Ok((Ok(data), ms)) => PhaseResult::ok(item_id, data, ms),
                    Ok((Err(failure), ms)) => {
                        PhaseResult::failed(item_id, failure.kind, failure.message, ms)
                    }
                    Err(e) => {
                        warn!("{}: task for item {} did not finish: {}", phase, item_id, e);
                        PhaseResult::failed(
                            item_id,
                            ErrorKind::Internal,
                            format!("task join failed: {}", e),
                            0.0,
                        )
                    }
                };

                if let Some(callback) = on_progress {
                    callback(&Progress {
                        phase: phase.to_string(),
                        completed: results.len() + 1,
                        total,
                        item_id: result.item_id.clone(),
                        success: result.success,
                    });
                }
                results.push(result);
            }

            let is_last = chunk_index + 1 == chunk_count;
            if !is_last && !self.policy.inter_chunk_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = self.sleeper.sleep(self.policy.inter_chunk_delay) => {}
                }
            }
        }

        if cancel.is_cancelled() && results.len() < total {
            cancelled = true;
        }
        if cancelled {
            warn!(
                "{}: cancelled with {} of {} items dispatched",
                phase,
                results.len(),
                total
            );
            let dispatched = results.len();
            for item_id in &item_ids[dispatched..] {
                let failure = ItemFailure::cancelled();
                results.push(PhaseResult::failed(
                    item_id.clone(),
                    failure.kind,
                    failure.message,
                    0.0,
                ));
            }
        }

        let mut report = BatchReport::from_results(phase, results, started_at, elapsed_ms(start));
        report.cancelled = cancelled || cancel.is_cancelled();
        report
    }
}
