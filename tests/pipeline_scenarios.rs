// End-to-end batch runs over fake collaborators

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use catalog_enrichment::core::errors::ServiceResult;
use catalog_enrichment::core::types::{
    Classification, CompetitorCandidate, CompetitorDetail, ConfidenceLevel, DeferralReason,
    FieldCompletion, FieldSource, Item, MarketSearch, MarketSignal, PhaseName, PhaseOutput,
    ProfitEstimate, RejectReason, SelectionDecision, ShippingQuote,
};
use catalog_enrichment::phases::Collaborators;
use catalog_enrichment::services::{
    AiCompletionService, CalculationService, ClassificationService, CompletionContext,
    InMemoryItemStore, ItemDetailProvider, ItemStore, MarketSearchService, TranslationService,
};
use catalog_enrichment::{
    BatchOrchestrator, Config, ErrorKind, Metrics, RecordingSleeper, SelectionGate, ServiceError,
};

/// Tracks peak concurrency and scripts failures per item id
#[derive(Default)]
struct FakeClassifier {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    /// item id -> remaining 503 responses before success
    transient: Mutex<HashMap<String, usize>>,
    attempts: Mutex<HashMap<String, usize>>,
}

#[async_trait]
impl ClassificationService for FakeClassifier {
    async fn classify(&self, item: &Item) -> ServiceResult<Classification> {
        *self.attempts.lock().entry(item.id.clone()).or_default() += 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if item.title == "gone" {
            return Err(ServiceError::from_status(404, "no such product"));
        }
        if let Some(remaining) = self.transient.lock().get_mut(&item.id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ServiceError::from_status(503, "overloaded"));
            }
        }
        Ok(Classification {
            category: "Kitchen".to_string(),
            category_id: "k-100".to_string(),
            hs_code: Some("7323.93".to_string()),
        })
    }
}

struct FakeCalculation;

#[async_trait]
impl CalculationService for FakeCalculation {
    async fn compute_shipping(&self, item: &Item) -> ServiceResult<ShippingQuote> {
        Ok(ShippingQuote {
            cost: item.weight_g.unwrap_or(0.0) / 100.0,
        })
    }

    async fn compute_profit(&self, item: &Item) -> ServiceResult<ProfitEstimate> {
        let price = item.price.unwrap_or(0.0);
        let costs = item.cost.unwrap_or(0.0) + item.shipping_cost.unwrap_or(0.0);
        Ok(ProfitEstimate {
            margin: (price - costs) / price,
        })
    }
}

struct FakeMarket;

#[async_trait]
impl MarketSearchService for FakeMarket {
    async fn search_competitors(&self, item: &Item) -> ServiceResult<MarketSearch> {
        Ok(MarketSearch {
            candidates: vec![CompetitorCandidate {
                external_item_id: format!("c-{}", item.id),
                title: format!("{} (used)", item.title),
                price: 28.0,
                match_confidence: 0.9,
                specifics: BTreeMap::new(),
            }],
            signal: Some(MarketSignal {
                sold_count: 25,
                avg_price: 27.0,
                recommended_price: 29.0,
                demand_score: 60,
                confidence_level: ConfidenceLevel::Mid,
            }),
        })
    }
}

struct FakeDetail;

#[async_trait]
impl ItemDetailProvider for FakeDetail {
    fn name(&self) -> &str {
        "primary"
    }

    async fn fetch_detail(&self, external_item_id: &str) -> ServiceResult<CompetitorDetail> {
        Ok(detail(external_item_id))
    }
}

/// Answers every completion request with the current script, asked for or not
#[derive(Default)]
struct ScriptedAi {
    script: Mutex<Vec<FieldCompletion>>,
}

impl ScriptedAi {
    fn answer(&self, field: &str, value: &str, confidence: f64) {
        *self.script.lock() = vec![FieldCompletion {
            field: field.to_string(),
            value: value.to_string(),
            confidence,
            reasoning: String::new(),
        }];
    }
}

#[async_trait]
impl AiCompletionService for ScriptedAi {
    async fn complete(
        &self,
        _item: &Item,
        _context: &CompletionContext,
        _missing_fields: &[String],
    ) -> ServiceResult<Vec<FieldCompletion>> {
        Ok(self.script.lock().clone())
    }
}

#[async_trait]
impl TranslationService for ScriptedAi {
    async fn translate(&self, text: &str, _target_language: &str) -> ServiceResult<String> {
        Ok(text.to_uppercase())
    }
}

fn detail(external_item_id: &str) -> CompetitorDetail {
    CompetitorDetail {
        external_item_id: external_item_id.to_string(),
        provider: String::new(),
        specifics: BTreeMap::new(),
        weight_g: None,
        dimensions: None,
        origin_country: None,
        brand: Some("Acme".to_string()),
    }
}

fn catalog_item(id: usize) -> Item {
    let mut item = Item::new(id.to_string(), format!("Enamel pot {}", id));
    item.price = Some(30.0);
    item.cost = Some(10.0);
    item.weight_g = Some(500.0);
    item
}

fn ids(n: usize) -> Vec<String> {
    (1..=n).map(|i| i.to_string()).collect()
}

struct Harness {
    orchestrator: BatchOrchestrator,
    gate: Arc<SelectionGate>,
    store: InMemoryItemStore,
    sleeper: RecordingSleeper,
    classifier: Arc<FakeClassifier>,
    ai: Arc<ScriptedAi>,
}

fn harness(items: Vec<Item>) -> Harness {
    let config = Config::default();
    let store = InMemoryItemStore::with_items(items);
    let gate = Arc::new(SelectionGate::new());
    let sleeper = RecordingSleeper::new();
    let classifier = Arc::new(FakeClassifier::default());
    let ai = Arc::new(ScriptedAi::default());

    let collaborators = Collaborators {
        classification: classifier.clone(),
        calculation: Arc::new(FakeCalculation),
        market_search: Arc::new(FakeMarket),
        detail_providers: vec![Arc::new(FakeDetail) as Arc<dyn ItemDetailProvider>],
        ai: ai.clone(),
        translation: ai.clone(),
    };

    let orchestrator = BatchOrchestrator::from_config(
        &config,
        collaborators,
        Arc::new(store.clone()),
        gate.clone(),
        Metrics::new(),
        Arc::new(sleeper.clone()),
    );

    Harness {
        orchestrator,
        gate,
        store,
        sleeper,
        classifier,
        ai,
    }
}

#[tokio::test]
async fn twelve_items_run_in_three_chunks() {
    let h = harness((1..=12).map(catalog_item).collect());

    let report = h
        .orchestrator
        .run_phase(PhaseName::Classify, &ids(12))
        .await
        .unwrap();

    assert_eq!((report.total, report.succeeded, report.failed), (12, 12, 0));
    assert_eq!(h.classifier.peak.load(Ordering::SeqCst), 5);
    // Chunks of 5, 5 and 2: a pause between chunks, none after the last
    assert_eq!(h.sleeper.recorded(), vec![Duration::from_millis(2000); 2]);
    assert_eq!(
        h.store.get("7").await.unwrap().category.as_deref(),
        Some("Kitchen")
    );
}

#[tokio::test]
async fn transient_failures_retry_with_backoff_and_not_found_does_not() {
    let mut gone = Item::new("2", "gone");
    gone.weight_g = Some(100.0);
    let h = harness(vec![catalog_item(1), gone]);
    h.classifier.transient.lock().insert("1".to_string(), 2);

    let report = h
        .orchestrator
        .run_phase(PhaseName::Classify, &ids(2))
        .await
        .unwrap();

    assert_eq!((report.succeeded, report.failed), (1, 1));
    let attempts = h.classifier.attempts.lock().clone();
    assert_eq!(attempts["1"], 3);
    assert_eq!(attempts["2"], 1);
    assert_eq!(
        h.sleeper.recorded(),
        vec![Duration::from_millis(1000), Duration::from_millis(2000)]
    );

    let failed = report.results.iter().find(|r| !r.success).unwrap();
    assert_eq!(failed.item_id, "2");
    assert_eq!(failed.error_kind, Some(ErrorKind::NotFound));
}

#[tokio::test]
async fn chain_pauses_at_gate_and_resumes_after_selection() {
    let h = harness((1..=3).map(catalog_item).collect());
    h.ai.answer("material", "steel", 0.8);

    let first = h.orchestrator.run_all(&ids(3)).await;

    assert!(first.halted_at.is_none());
    assert_eq!(first.awaiting_selection, ids(3));
    assert!(!first.fully_advanced());
    let fetch = first.phases.last().unwrap();
    assert_eq!(fetch.phase, "fetch-detail");
    assert_eq!(fetch.total, 0);
    assert!(fetch
        .deferred
        .iter()
        .all(|d| d.reason == DeferralReason::AwaitingSelection));
    assert_eq!(h.gate.pending().len(), 3);

    h.gate
        .resolve("1", SelectionDecision::Choose { external_item_id: "c-1".into() })
        .unwrap();
    h.gate.resolve("2", SelectionDecision::Skip).unwrap();
    h.gate
        .resolve("3", SelectionDecision::Choose { external_item_id: "c-3".into() })
        .unwrap();

    let second = h.orchestrator.run_from(PhaseName::FetchDetail, &ids(3)).await;

    assert!(second.overall_success);
    assert!(second.awaiting_selection.is_empty());
    assert!(second.fully_advanced());
    let fetch = &second.phases[0];
    assert_eq!((fetch.succeeded, fetch.failed), (2, 0));
    assert_eq!(fetch.deferred.len(), 1);
    assert_eq!(fetch.deferred[0].item_id, "2");
    assert_eq!(fetch.deferred[0].reason, DeferralReason::SelectionSkipped);
    let phases: Vec<_> = second.phases.iter().map(|p| p.phase.as_str()).collect();
    assert_eq!(phases, vec!["fetch-detail", "ai-complete", "score"]);
    // The skipped item rejoins after the detail fetch
    assert_eq!((second.phases[1].total, second.phases[1].succeeded), (3, 3));
    assert_eq!((second.phases[2].total, second.phases[2].succeeded), (3, 3));

    let enriched = h.store.get("1").await.unwrap();
    assert_eq!(enriched.competitor.as_ref().unwrap().provider, "primary");
    assert_eq!(enriched.attribute("brand").unwrap().source, FieldSource::Market);
    assert_eq!(enriched.attribute("material").unwrap().value, "steel");
    assert!(enriched.score.is_some());
    // Score ends the selection cycle
    assert_eq!(h.gate.state("1"), None);

    let skipped = h.store.get("2").await.unwrap();
    assert!(skipped.competitor.is_none());
    assert_eq!(skipped.attribute("material").unwrap().value, "steel");
    assert!(skipped.score.is_some());
    assert_eq!(h.gate.state("2"), None);
}

#[tokio::test]
async fn low_confidence_rerun_keeps_earlier_ai_value() {
    let mut item = catalog_item(1);
    item.competitor = Some(detail("c-1"));
    let h = harness(vec![item]);

    h.ai.answer("material", "steel", 0.8);
    let first = h
        .orchestrator
        .run_phase(PhaseName::AiComplete, &ids(1))
        .await
        .unwrap();
    match first.results[0].data {
        Some(PhaseOutput::Completed(ref outcome)) => {
            assert_eq!(outcome.applied_fields, vec!["material".to_string()])
        }
        ref other => panic!("unexpected output {:?}", other),
    }

    h.ai.answer("material", "aluminium", 0.5);
    let second = h
        .orchestrator
        .run_phase(PhaseName::AiComplete, &ids(1))
        .await
        .unwrap();
    assert_eq!(second.succeeded, 1);
    match second.results[0].data {
        Some(PhaseOutput::Completed(ref outcome)) => {
            assert!(outcome.applied_fields.is_empty());
            assert_eq!(outcome.rejected_fields[0].reason, RejectReason::LowConfidence);
        }
        ref other => panic!("unexpected output {:?}", other),
    }

    // A confident answer does not replace a value the item already has either
    h.ai.answer("material", "iron", 0.95);
    let third = h
        .orchestrator
        .run_phase(PhaseName::AiComplete, &ids(1))
        .await
        .unwrap();
    match third.results[0].data {
        Some(PhaseOutput::Completed(ref outcome)) => {
            assert!(outcome.applied_fields.is_empty());
            assert_eq!(outcome.rejected_fields[0].reason, RejectReason::AlreadyFilled);
        }
        ref other => panic!("unexpected output {:?}", other),
    }

    let stored = h.store.get("1").await.unwrap();
    let material = stored.attribute("material").unwrap();
    assert_eq!(material.value, "steel");
    assert_eq!(material.source, FieldSource::Ai { confidence: 0.8 });
}

#[tokio::test]
async fn gated_phase_without_selection_defers_instead_of_failing() {
    let h = harness(vec![catalog_item(1)]);

    let report = h
        .orchestrator
        .run_phase(PhaseName::FetchDetail, &ids(1))
        .await
        .unwrap();

    assert_eq!((report.total, report.failed), (0, 0));
    assert_eq!(report.deferred[0].reason, DeferralReason::NoSelection);
}

#[tokio::test]
async fn translate_runs_outside_the_chain() {
    let h = harness(vec![catalog_item(1)]);

    let report = h
        .orchestrator
        .run_phase(PhaseName::Translate, &ids(1))
        .await
        .unwrap();

    assert_eq!(report.succeeded, 1);
    assert_eq!(
        h.store.get("1").await.unwrap().translated_title.as_deref(),
        Some("ENAMEL POT 1")
    );
}
