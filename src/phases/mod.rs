// Phase functions
//
// Each phase maps (item snapshot, context) to a typed output. Phases hold no
// mutable state; anything an earlier phase produced arrives via the item
// snapshot or PhaseContext.

pub mod ai_complete;
pub mod classify;
pub mod fetch_detail;
pub mod generate_html;
pub mod profit;
pub mod score;
pub mod search;
pub mod shipping;
pub mod translate;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::config::Config;
use crate::core::errors::ServiceResult;
use crate::core::types::{CompetitorCandidate, CompetitorDetail, Item, PhaseName, PhaseOutput};
use crate::orchestration::enrichment_merger::EnrichmentMerger;
use crate::services::{
    AiCompletionService, CalculationService, ClassificationService, ItemDetailProvider,
    MarketSearchService, RemoteCallExecutor, TranslationService,
};

pub use ai_complete::AiCompletePhase;
pub use classify::ClassifyPhase;
pub use fetch_detail::FetchDetailPhase;
pub use generate_html::GenerateHtmlPhase;
pub use profit::ProfitPhase;
pub use score::ScorePhase;
pub use search::SearchCompetitorsPhase;
pub use shipping::ShippingPhase;
pub use translate::TranslatePhase;

/// Prerequisite data handed to a phase explicitly
#[derive(Debug, Clone, Default)]
pub struct PhaseContext {
    /// Candidate the operator chose at the selection gate
    pub selection: Option<CompetitorCandidate>,
    /// Detail fetched for the chosen candidate
    pub competitor: Option<CompetitorDetail>,
    pub target_language: String,
}

#[async_trait]
pub trait Phase: Send + Sync {
    fn name(&self) -> PhaseName;
    async fn execute(&self, item: &Item, context: &PhaseContext) -> ServiceResult<PhaseOutput>;
}

/// External collaborators the standard phases call
#[derive(Clone)]
pub struct Collaborators {
    pub classification: Arc<dyn ClassificationService>,
    pub calculation: Arc<dyn CalculationService>,
    pub market_search: Arc<dyn MarketSearchService>,
    /// Tried in order: primary first, then fallbacks
    pub detail_providers: Vec<Arc<dyn ItemDetailProvider>>,
    pub ai: Arc<dyn AiCompletionService>,
    pub translation: Arc<dyn TranslationService>,
}

/// Phase lookup by name
#[derive(Clone, Default)]
pub struct PhaseSet {
    phases: HashMap<PhaseName, Arc<dyn Phase>>,
}

impl PhaseSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// All nine phases wired to the given collaborators, with per-phase deadlines from config
    pub fn standard(collaborators: Collaborators, executor: &RemoteCallExecutor, config: &Config) -> Self {
        let default_exec = executor.with_timeout(config.retry.default_timeout);
        let search_exec = executor.with_timeout(config.retry.search_timeout);
        let ai_exec = executor.with_timeout(config.retry.ai_timeout);
        let target_fields = config.merge.ai_target_fields.clone();

        Self::new()
            .with(ClassifyPhase::new(collaborators.classification, default_exec.clone()))
            .with(ShippingPhase::new(collaborators.calculation.clone(), default_exec.clone()))
            .with(ProfitPhase::new(collaborators.calculation, default_exec.clone()))
            .with(SearchCompetitorsPhase::new(collaborators.market_search, search_exec))
            .with(FetchDetailPhase::new(collaborators.detail_providers, default_exec))
            .with(AiCompletePhase::new(
                collaborators.ai,
                ai_exec.clone(),
                EnrichmentMerger::new(config.merge.confidence_threshold),
                target_fields.clone(),
            ))
            .with(ScorePhase::new(target_fields.clone()))
            .with(TranslatePhase::new(collaborators.translation, ai_exec))
            .with(GenerateHtmlPhase::new(target_fields))
    }

    pub fn with(mut self, phase: impl Phase + 'static) -> Self {
        self.phases.insert(phase.name(), Arc::new(phase));
        self
    }

    pub fn get(&self, name: PhaseName) -> Option<Arc<dyn Phase>> {
        self.phases.get(&name).cloned()
    }

    pub fn contains(&self, name: PhaseName) -> bool {
        self.phases.contains_key(&name)
    }
}
