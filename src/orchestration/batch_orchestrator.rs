// Batch Orchestrator: runs the enrichment chain phase by phase

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::core::config::Config;
use crate::core::errors::{ErrorKind, ItemFailure, PipelineError, PipelineResult};
use crate::core::types::{
    BatchReport, ChainReport, DeferralReason, DeferredItem, GateState, ItemId, PhaseName,
    PhaseOutput,
};
use crate::middleware::{CircuitBreakerConfig, CircuitBreakerStats};
use crate::orchestration::chunked_runner::{ChunkedRunner, ConcurrencyPolicy, ProgressFn};
use crate::orchestration::selection_gate::SelectionGate;
use crate::phases::{Collaborators, Phase, PhaseContext, PhaseSet};
use crate::services::{ItemStore, RemoteCallExecutor, RetryPolicy};
use crate::utils::{Metrics, Sleeper};

/// Main batch orchestrator
pub struct BatchOrchestrator {
    phases: PhaseSet,
    runner: ChunkedRunner,
    gate: Arc<SelectionGate>,
    store: Arc<dyn ItemStore>,
    executor: Option<RemoteCallExecutor>,
    metrics: Option<Metrics>,
    target_language: String,
    cancel_root: Mutex<CancellationToken>,
}

/// Keep first occurrence of each id
fn dedup(item_ids: &[ItemId]) -> Vec<ItemId> {
    let mut seen = HashSet::new();
    item_ids
        .iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

impl BatchOrchestrator {
    pub fn new(
        phases: PhaseSet,
        runner: ChunkedRunner,
        gate: Arc<SelectionGate>,
        store: Arc<dyn ItemStore>,
    ) -> Self {
        Self {
            phases,
            runner,
            gate,
            store,
            executor: None,
            metrics: None,
            target_language: "English".to_string(),
            cancel_root: Mutex::new(CancellationToken::new()),
        }
    }

    /// Wire the standard phases, retry policy, breakers and runner from configuration
    #[instrument(skip_all)]
    pub fn from_config(
        config: &Config,
        collaborators: Collaborators,
        store: Arc<dyn ItemStore>,
        gate: Arc<SelectionGate>,
        metrics: Metrics,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        info!("Initializing pipeline...");

        let executor = RemoteCallExecutor::new(RetryPolicy::from_config(&config.retry))
            .with_sleeper(sleeper.clone())
            .with_circuit_breakers(CircuitBreakerConfig {
                failure_threshold: config.circuit_breaker.failure_threshold,
                cooldown: config.circuit_breaker.cooldown,
                ..CircuitBreakerConfig::default()
            })
            .with_metrics(metrics.clone());

        let phases = PhaseSet::standard(collaborators, &executor, config);
        let runner = ChunkedRunner::new(ConcurrencyPolicy::from_config(&config.batch))
            .with_sleeper(sleeper);

        info!(
            "✓ Ready (concurrency: {}, inter-chunk delay: {}ms, attempts: {}, threshold: {})",
            config.concurrency(),
            config.inter_chunk_delay().as_millis(),
            config.retry.max_retries,
            config.confidence_threshold()
        );

        let mut orchestrator = Self::new(phases, runner, gate, store)
            .with_metrics(metrics)
            .with_target_language(config.services.target_language.clone());
        orchestrator.executor = Some(executor);
        orchestrator
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_target_language(mut self, language: impl Into<String>) -> Self {
        self.target_language = language.into();
        self
    }

    pub fn gate(&self) -> &Arc<SelectionGate> {
        &self.gate
    }

    pub fn circuit_stats(&self) -> Vec<CircuitBreakerStats> {
        self.executor
            .as_ref()
            .map(|e| e.circuit_stats())
            .unwrap_or_default()
    }

    /// A token that `cancel_all` will also cancel
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_root.lock().child_token()
    }

    /// Abort every run in flight. Later runs are unaffected.
    pub fn cancel_all(&self) {
        let mut root = self.cancel_root.lock();
        root.cancel();
        *root = CancellationToken::new();
        warn!("All in-flight batches cancelled");
    }

    /// Run the full chain from classification
    pub async fn run_all(&self, item_ids: &[ItemId]) -> ChainReport {
        self.run_chain_with(PhaseName::Classify, item_ids, self.cancellation_token(), None)
            .await
    }

    /// Run the chain starting at `start`, e.g. `FetchDetail` once selections are resolved
    pub async fn run_from(&self, start: PhaseName, item_ids: &[ItemId]) -> ChainReport {
        self.run_chain_with(start, item_ids, self.cancellation_token(), None)
            .await
    }

    /// Chain execution with caller-supplied cancellation and progress.
    ///
    /// Items that succeed a phase advance to the next, as do items whose
    /// selection was skipped. The chain halts at the first phase that
    /// dispatched items and had no success. Phases outside the default chain
    /// run alone when given as `start`.
    #[instrument(skip(self, item_ids, cancel, on_progress), fields(items = item_ids.len(), start = %start))]
    pub async fn run_chain_with(
        &self,
        start: PhaseName,
        item_ids: &[ItemId],
        cancel: CancellationToken,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> ChainReport {
        let run_id = Uuid::new_v4();
        let chain: Vec<PhaseName> = match PhaseName::CHAIN.iter().position(|p| *p == start) {
            Some(index) => PhaseName::CHAIN[index..].to_vec(),
            None => vec![start],
        };
        info!("Run {}: {} items through {} phases", run_id, item_ids.len(), chain.len());

        let mut current = dedup(item_ids);
        let mut reports = Vec::new();
        let mut halted_at = None;
        let mut cancelled = false;

        for name in chain {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            if current.is_empty() {
                break;
            }

            let report = match self.run_phase_inner(name, &current, &cancel, on_progress).await {
                Ok(report) => report,
                Err(e) => {
                    warn!("Run {}: phase {} unavailable: {}", run_id, name, e);
                    halted_at = Some(name);
                    break;
                }
            };

            let next = {
                let advancing: HashSet<&str> = report
                    .results
                    .iter()
                    .filter(|r| r.success)
                    .map(|r| r.item_id.as_str())
                    .chain(
                        report
                            .deferred
                            .iter()
                            .filter(|d| !d.reason.holds_item())
                            .map(|d| d.item_id.as_str()),
                    )
                    .collect();
                current
                    .iter()
                    .filter(|id| advancing.contains(id.as_str()))
                    .cloned()
                    .collect::<Vec<_>>()
            };
            let phase_failed = report.is_phase_failure();
            cancelled = report.cancelled;
            reports.push(report);

            if cancelled {
                break;
            }
            if phase_failed {
                warn!("Run {}: halting, no item succeeded in {}", run_id, name);
                halted_at = Some(name);
                break;
            }
            current = next;
        }

        let mut awaiting_selection: Vec<ItemId> = Vec::new();
        for deferred in reports.iter().flat_map(|r| r.deferred.iter()) {
            if deferred.reason == DeferralReason::AwaitingSelection
                && !awaiting_selection.contains(&deferred.item_id)
            {
                awaiting_selection.push(deferred.item_id.clone());
            }
        }

        if let Some(ref m) = self.metrics {
            m.record_chain(halted_at.is_some());
        }

        let report = ChainReport {
            run_id,
            overall_success: halted_at.is_none() && !cancelled,
            phases: reports,
            halted_at,
            awaiting_selection,
            cancelled,
        };
        info!(
            "Run {} finished: success={}, halted_at={:?}, awaiting selection={}",
            run_id,
            report.overall_success,
            report.halted_at,
            report.awaiting_selection.len()
        );
        report
    }

    /// Run one phase in isolation (retry a failed subset, or run translate / generate-html)
    pub async fn run_phase(
        &self,
        name: PhaseName,
        item_ids: &[ItemId],
    ) -> PipelineResult<BatchReport<PhaseOutput>> {
        self.run_phase_with(name, item_ids, self.cancellation_token(), None)
            .await
    }

    pub async fn run_phase_with(
        &self,
        name: PhaseName,
        item_ids: &[ItemId],
        cancel: CancellationToken,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> PipelineResult<BatchReport<PhaseOutput>> {
        self.run_phase_inner(name, &dedup(item_ids), &cancel, on_progress)
            .await
    }

    #[instrument(skip(self, item_ids, cancel, on_progress), fields(phase = %name, items = item_ids.len()))]
    async fn run_phase_inner(
        &self,
        name: PhaseName,
        item_ids: &[ItemId],
        cancel: &CancellationToken,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> PipelineResult<BatchReport<PhaseOutput>> {
        let phase = self
            .phases
            .get(name)
            .ok_or_else(|| PipelineError::UnknownPhase(name.to_string()))?;
        let start = Instant::now();

        let (dispatch, deferred) = if name.is_gated() {
            self.partition_by_gate(name, item_ids).await
        } else {
            (item_ids.to_vec(), Vec::new())
        };

        let phase_fn = {
            let store = self.store.clone();
            let gate = self.gate.clone();
            let target_language = self.target_language.clone();
            move |item_id: ItemId| {
                run_item(
                    name,
                    phase.clone(),
                    store.clone(),
                    gate.clone(),
                    target_language.clone(),
                    item_id,
                )
            }
        };

        let mut report = self
            .runner
            .run(name.as_str(), &dispatch, phase_fn, on_progress, cancel)
            .await;
        report.deferred = deferred;

        self.log_phase(&report, start.elapsed());
        Ok(report)
    }

    /// Split ids into those a gated phase may run for and those held back
    async fn partition_by_gate(
        &self,
        name: PhaseName,
        item_ids: &[ItemId],
    ) -> (Vec<ItemId>, Vec<DeferredItem>) {
        let mut dispatch = Vec::new();
        let mut deferred = Vec::new();

        for item_id in item_ids {
            let reason = match self.gate.state(item_id) {
                // A selection finished in an earlier cycle lives on as the persisted competitor
                None if name != PhaseName::FetchDetail => match self.store.get(item_id).await {
                    Ok(item) if item.competitor.is_none() => Some(DeferralReason::NoSelection),
                    _ => None,
                },
                // Nothing to choose from, so the cycle ends here
                Some(GateState::Searched) => {
                    self.gate.clear(item_id);
                    Some(DeferralReason::NoSelection)
                }
                _ => self.gate.deferral_reason(name, item_id),
            };

            match reason {
                Some(reason) => deferred.push(DeferredItem {
                    item_id: item_id.clone(),
                    reason,
                }),
                None => dispatch.push(item_id.clone()),
            }
        }
        (dispatch, deferred)
    }

    fn log_phase(&self, report: &BatchReport<PhaseOutput>, elapsed: Duration) {
        info!(
            "✓ {} complete: {}/{} succeeded, {} failed, {} deferred in {:.0}ms",
            report.phase,
            report.succeeded,
            report.total,
            report.failed,
            report.deferred.len(),
            elapsed.as_secs_f64() * 1000.0
        );
        for error in report.errors.iter().take(10) {
            warn!("  {} {}", report.phase, error);
        }

        if let Some(ref m) = self.metrics {
            m.record_phase(
                &report.phase,
                report.succeeded,
                report.failed,
                report.deferred.len(),
                elapsed,
            );
        }
    }
}

/// One item through one phase: load, execute, persist, advance the gate
async fn run_item(
    name: PhaseName,
    phase: Arc<dyn Phase>,
    store: Arc<dyn ItemStore>,
    gate: Arc<SelectionGate>,
    target_language: String,
    item_id: ItemId,
) -> Result<PhaseOutput, ItemFailure> {
    let item = store.get(&item_id).await?;
    let skipped = name.is_gated() && gate.state(&item_id) == Some(GateState::Skipped);
    let context = PhaseContext {
        selection: gate.chosen(&item_id),
        // A competitor from an earlier cycle does not apply once the operator skipped
        competitor: if skipped { None } else { item.competitor.clone() },
        target_language,
    };

    let output = phase.execute(&item, &context).await?;

    let update = output.to_update();
    if !update.is_empty() {
        store
            .persist(&item_id, &update)
            .await
            .map_err(|e| ItemFailure::new(ErrorKind::Storage, e.to_string()))?;
    }

    match (name, &output) {
        (PhaseName::SearchCompetitors, PhaseOutput::Searched(search)) => {
            gate.open(&item_id, search.candidates.clone());
        }
        (PhaseName::Score, _) => {
            gate.clear(&item_id);
        }
        _ => {}
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ServiceResult;
    use crate::core::types::{Item, SelectionDecision};
    use crate::services::InMemoryItemStore;
    use async_trait::async_trait;

    /// Succeeds for every item except those listed
    struct Flaky {
        name: PhaseName,
        failing: Vec<&'static str>,
    }

    #[async_trait]
    impl Phase for Flaky {
        fn name(&self) -> PhaseName {
            self.name
        }

        async fn execute(&self, item: &Item, _context: &PhaseContext) -> ServiceResult<PhaseOutput> {
            if self.failing.contains(&item.id.as_str()) {
                return Err(crate::core::errors::ServiceError::from_status(503, "down"));
            }
            Ok(PhaseOutput::Translated {
                title: item.title.to_uppercase(),
            })
        }
    }

    fn orchestrator(phases: PhaseSet, store: InMemoryItemStore) -> BatchOrchestrator {
        BatchOrchestrator::new(
            phases,
            ChunkedRunner::new(ConcurrencyPolicy::new(2, Duration::ZERO)),
            Arc::new(SelectionGate::new()),
            Arc::new(store),
        )
    }

    fn store(n: usize) -> InMemoryItemStore {
        InMemoryItemStore::with_items((1..=n).map(|i| Item::new(i.to_string(), format!("item {}", i))))
    }

    fn ids(n: usize) -> Vec<ItemId> {
        (1..=n).map(|i| i.to_string()).collect()
    }

    #[tokio::test]
    async fn test_unknown_phase_is_an_error() {
        let orchestrator = orchestrator(PhaseSet::new(), store(1));
        assert!(matches!(
            orchestrator.run_phase(PhaseName::Translate, &ids(1)).await,
            Err(PipelineError::UnknownPhase(_))
        ));
    }

    #[tokio::test]
    async fn test_run_phase_persists_successes() {
        let store = store(3);
        let orchestrator = orchestrator(
            PhaseSet::new().with(Flaky {
                name: PhaseName::Translate,
                failing: vec!["2"],
            }),
            store.clone(),
        );

        let report = orchestrator
            .run_phase(PhaseName::Translate, &ids(3))
            .await
            .unwrap();

        assert_eq!((report.succeeded, report.failed), (2, 1));
        let failed = report.results.iter().find(|r| !r.success).unwrap();
        assert_eq!(failed.error_kind, Some(ErrorKind::TransientNetwork));
        assert_eq!(
            store.get("1").await.unwrap().translated_title.as_deref(),
            Some("ITEM 1")
        );
        assert_eq!(store.get("2").await.unwrap().translated_title, None);
    }

    #[tokio::test]
    async fn test_chain_halts_when_a_phase_has_no_success() {
        let orchestrator = orchestrator(
            PhaseSet::new()
                .with(Flaky {
                    name: PhaseName::Classify,
                    failing: vec![],
                })
                .with(Flaky {
                    name: PhaseName::Shipping,
                    failing: vec!["1", "2"],
                }),
            store(2),
        );

        let chain = orchestrator.run_all(&ids(2)).await;

        assert!(!chain.overall_success);
        assert_eq!(chain.halted_at, Some(PhaseName::Shipping));
        assert_eq!(chain.phases.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_items_do_not_advance() {
        let orchestrator = orchestrator(
            PhaseSet::new()
                .with(Flaky {
                    name: PhaseName::Classify,
                    failing: vec!["2"],
                })
                .with(Flaky {
                    name: PhaseName::Shipping,
                    failing: vec![],
                })
                .with(Flaky {
                    name: PhaseName::Profit,
                    failing: vec![],
                }),
            store(3),
        );

        let chain = orchestrator.run_all(&ids(3)).await;

        assert_eq!(chain.phases[1].total, 2);
        assert!(chain.phases[1].results.iter().all(|r| r.item_id != "2"));
        // Missing search phase stops the chain
        assert_eq!(chain.halted_at, Some(PhaseName::SearchCompetitors));
    }

    #[tokio::test]
    async fn test_gated_phase_defers_unselected_items() {
        let orchestrator = orchestrator(
            PhaseSet::new().with(Flaky {
                name: PhaseName::FetchDetail,
                failing: vec![],
            }),
            store(2),
        );
        let gate = orchestrator.gate().clone();
        gate.open("1", vec![crate::core::types::CompetitorCandidate {
            external_item_id: "ext".into(),
            title: "t".into(),
            price: 1.0,
            match_confidence: 0.9,
            specifics: Default::default(),
        }]);
        gate.open("2", Vec::new());
        gate.resolve("1", SelectionDecision::Choose { external_item_id: "ext".into() })
            .unwrap();

        let report = orchestrator
            .run_phase(PhaseName::FetchDetail, &ids(2))
            .await
            .unwrap();

        assert_eq!(report.total, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(
            report.deferred,
            vec![DeferredItem {
                item_id: "2".into(),
                reason: DeferralReason::NoSelection
            }]
        );
    }

    fn listing(id: &str) -> crate::core::types::CompetitorCandidate {
        crate::core::types::CompetitorCandidate {
            external_item_id: id.into(),
            title: "t".into(),
            price: 1.0,
            match_confidence: 0.9,
            specifics: Default::default(),
        }
    }

    fn gated_phases() -> PhaseSet {
        [PhaseName::FetchDetail, PhaseName::AiComplete, PhaseName::Score]
            .into_iter()
            .fold(PhaseSet::new(), |set, name| {
                set.with(Flaky {
                    name,
                    failing: vec![],
                })
            })
    }

    #[tokio::test]
    async fn test_skipped_item_finishes_remaining_phases() {
        let orchestrator = orchestrator(gated_phases(), store(2));
        let gate = orchestrator.gate().clone();
        gate.open("1", vec![listing("a")]);
        gate.open("2", vec![listing("b")]);
        gate.resolve("1", SelectionDecision::Choose { external_item_id: "a".into() })
            .unwrap();
        gate.resolve("2", SelectionDecision::Skip).unwrap();

        let chain = orchestrator.run_from(PhaseName::FetchDetail, &ids(2)).await;

        assert!(chain.overall_success);
        assert!(chain.fully_advanced());
        assert_eq!(chain.phases[0].total, 1);
        assert_eq!(
            chain.phases[0].deferred,
            vec![DeferredItem {
                item_id: "2".into(),
                reason: DeferralReason::SelectionSkipped
            }]
        );
        assert_eq!((chain.phases[1].total, chain.phases[1].succeeded), (2, 2));
        assert_eq!((chain.phases[2].total, chain.phases[2].succeeded), (2, 2));
        assert_eq!(gate.state("1"), None);
        assert_eq!(gate.state("2"), None);
    }

    #[tokio::test]
    async fn test_skipped_item_can_be_scored_directly() {
        let orchestrator = orchestrator(gated_phases(), store(1));
        let gate = orchestrator.gate().clone();
        gate.open("1", vec![listing("a")]);
        gate.resolve("1", SelectionDecision::Skip).unwrap();

        let report = orchestrator.run_phase(PhaseName::Score, &ids(1)).await.unwrap();

        assert_eq!(report.succeeded, 1);
        assert!(report.deferred.is_empty());
        assert_eq!(gate.state("1"), None);
    }

    #[tokio::test]
    async fn test_search_without_candidates_ends_the_cycle() {
        let orchestrator = orchestrator(gated_phases(), store(1));
        let gate = orchestrator.gate().clone();
        gate.open("1", Vec::new());

        let report = orchestrator
            .run_phase(PhaseName::FetchDetail, &ids(1))
            .await
            .unwrap();

        assert_eq!(report.deferred[0].reason, DeferralReason::NoSelection);
        assert_eq!(gate.state("1"), None);
    }

    #[tokio::test]
    async fn test_cancel_all_marks_chain_cancelled() {
        let orchestrator = orchestrator(
            PhaseSet::new().with(Flaky {
                name: PhaseName::Classify,
                failing: vec![],
            }),
            store(2),
        );
        let token = orchestrator.cancellation_token();
        orchestrator.cancel_all();

        let chain = orchestrator
            .run_chain_with(PhaseName::Classify, &ids(2), token, None)
            .await;
        assert!(chain.cancelled);
        assert!(!chain.overall_success);

        // A fresh run after cancel_all is not affected
        let report = orchestrator.run_phase(PhaseName::Classify, &ids(2)).await.unwrap();
        assert_eq!(report.succeeded, 2);
    }
}
