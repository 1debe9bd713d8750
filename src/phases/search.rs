// Competitor search and market signal

use async_trait::async_trait;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::core::errors::{ServiceError, ServiceResult};
use crate::core::types::{Item, PhaseName, PhaseOutput};
use crate::phases::{Phase, PhaseContext};
use crate::services::{MarketSearchService, RemoteCallExecutor};

pub struct SearchCompetitorsPhase {
    service: Arc<dyn MarketSearchService>,
    executor: RemoteCallExecutor,
}

impl SearchCompetitorsPhase {
    pub fn new(service: Arc<dyn MarketSearchService>, executor: RemoteCallExecutor) -> Self {
        Self { service, executor }
    }
}

#[async_trait]
impl Phase for SearchCompetitorsPhase {
    fn name(&self) -> PhaseName {
        PhaseName::SearchCompetitors
    }

    #[instrument(skip(self, item, _context), fields(item_id = %item.id))]
    async fn execute(&self, item: &Item, _context: &PhaseContext) -> ServiceResult<PhaseOutput> {
        if item.title.trim().is_empty() {
            return Err(ServiceError::Validation("item has no title to search for".to_string()));
        }

        let mut search = self
            .executor
            .call("market-search", || self.service.search_competitors(item))
            .await?;

        // Candidates without an id cannot be selected
        search
            .candidates
            .retain(|c| !c.external_item_id.trim().is_empty());
        // Best matches first for the operator
        search.candidates.sort_by(|a, b| {
            b.match_confidence
                .partial_cmp(&a.match_confidence)
                .unwrap_or(Ordering::Equal)
        });

        debug!("{} candidates for item {}", search.candidates.len(), item.id);
        Ok(PhaseOutput::Searched(search))
    }
}
