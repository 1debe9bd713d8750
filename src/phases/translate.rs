// Title translation into the configured target language

use async_trait::async_trait;
use std::sync::Arc;
use tracing::instrument;

use crate::core::errors::{ServiceError, ServiceResult};
use crate::core::types::{Item, PhaseName, PhaseOutput};
use crate::phases::{Phase, PhaseContext};
use crate::services::{RemoteCallExecutor, TranslationService};

pub struct TranslatePhase {
    service: Arc<dyn TranslationService>,
    executor: RemoteCallExecutor,
}

impl TranslatePhase {
    pub fn new(service: Arc<dyn TranslationService>, executor: RemoteCallExecutor) -> Self {
        Self { service, executor }
    }
}

#[async_trait]
impl Phase for TranslatePhase {
    fn name(&self) -> PhaseName {
        PhaseName::Translate
    }

    #[instrument(skip(self, item, context), fields(item_id = %item.id, language = %context.target_language))]
    async fn execute(&self, item: &Item, context: &PhaseContext) -> ServiceResult<PhaseOutput> {
        if context.target_language.trim().is_empty() {
            return Err(ServiceError::Validation("no target language".to_string()));
        }

        let title = self
            .executor
            .call("translation", || {
                self.service.translate(&item.title, &context.target_language)
            })
            .await?;

        if title.trim().is_empty() {
            return Err(ServiceError::InvalidResponse("empty translation".to_string()));
        }
        Ok(PhaseOutput::Translated { title })
    }
}
