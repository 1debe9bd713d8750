// Category and HS code classification

use async_trait::async_trait;
use std::sync::Arc;
use tracing::instrument;

use crate::core::errors::{ServiceError, ServiceResult};
use crate::core::types::{Item, PhaseName, PhaseOutput};
use crate::phases::{Phase, PhaseContext};
use crate::services::{ClassificationService, RemoteCallExecutor};

pub struct ClassifyPhase {
    service: Arc<dyn ClassificationService>,
    executor: RemoteCallExecutor,
}

impl ClassifyPhase {
    pub fn new(service: Arc<dyn ClassificationService>, executor: RemoteCallExecutor) -> Self {
        Self { service, executor }
    }
}

#[async_trait]
impl Phase for ClassifyPhase {
    fn name(&self) -> PhaseName {
        PhaseName::Classify
    }

    #[instrument(skip(self, item, _context), fields(item_id = %item.id))]
    async fn execute(&self, item: &Item, _context: &PhaseContext) -> ServiceResult<PhaseOutput> {
        if item.title.trim().is_empty() {
            return Err(ServiceError::Validation("item has no title".to_string()));
        }

        let classification = self
            .executor
            .call("classification", || self.service.classify(item))
            .await?;

        if classification.category.trim().is_empty() {
            return Err(ServiceError::InvalidResponse(
                "classification returned an empty category".to_string(),
            ));
        }
        Ok(PhaseOutput::Classified(classification))
    }
}
