// AI completion of missing attributes, gated by EnrichmentMerger

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::core::errors::ServiceResult;
use crate::core::types::{Item, MergeOutcome, PhaseName, PhaseOutput};
use crate::orchestration::enrichment_merger::EnrichmentMerger;
use crate::phases::{Phase, PhaseContext};
use crate::services::{AiCompletionService, CompletionContext, RemoteCallExecutor};

pub struct AiCompletePhase {
    service: Arc<dyn AiCompletionService>,
    executor: RemoteCallExecutor,
    merger: EnrichmentMerger,
    target_fields: Vec<String>,
}

impl AiCompletePhase {
    pub fn new(
        service: Arc<dyn AiCompletionService>,
        executor: RemoteCallExecutor,
        merger: EnrichmentMerger,
        target_fields: Vec<String>,
    ) -> Self {
        Self {
            service,
            executor,
            merger,
            target_fields,
        }
    }

    fn open_fields(&self, item: &Item) -> Vec<String> {
        self.target_fields
            .iter()
            .filter(|field| item.needs_completion(field))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Phase for AiCompletePhase {
    fn name(&self) -> PhaseName {
        PhaseName::AiComplete
    }

    #[instrument(skip(self, item, context), fields(item_id = %item.id))]
    async fn execute(&self, item: &Item, context: &PhaseContext) -> ServiceResult<PhaseOutput> {
        let missing = self.open_fields(item);
        if missing.is_empty() {
            debug!("Item {} has nothing left to complete", item.id);
            return Ok(PhaseOutput::Completed(MergeOutcome::default()));
        }

        let completion_context = CompletionContext {
            competitor: context.competitor.clone(),
            market: item.market.clone(),
        };

        let completions = self
            .executor
            .call("ai-completion", || {
                self.service.complete(item, &completion_context, &missing)
            })
            .await?;

        let outcome = self.merger.merge(item, &completions);
        debug!(
            "Item {}: {} applied, {} rejected",
            item.id,
            outcome.applied_fields.len(),
            outcome.rejected_fields.len()
        );
        Ok(PhaseOutput::Completed(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{FieldCompletion, FieldSource, FieldValue, RejectReason};
    use crate::services::RetryPolicy;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct ScriptedAi {
        asked: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl AiCompletionService for ScriptedAi {
        async fn complete(
            &self,
            _item: &Item,
            _context: &CompletionContext,
            missing_fields: &[String],
        ) -> ServiceResult<Vec<FieldCompletion>> {
            self.asked.lock().push(missing_fields.to_vec());
            Ok(vec![
                FieldCompletion {
                    field: "material".into(),
                    value: "steel".into(),
                    confidence: 0.8,
                    reasoning: String::new(),
                },
                FieldCompletion {
                    field: "color".into(),
                    value: "red".into(),
                    confidence: 0.3,
                    reasoning: String::new(),
                },
            ])
        }
    }

    fn phase(ai: Arc<ScriptedAi>) -> AiCompletePhase {
        AiCompletePhase::new(
            ai,
            RemoteCallExecutor::new(RetryPolicy::new(1, Duration::ZERO, Duration::from_secs(1))),
            EnrichmentMerger::default(),
            vec!["material".into(), "color".into(), "brand".into()],
        )
    }

    #[tokio::test]
    async fn test_asks_only_for_open_fields_and_merges() {
        let ai = Arc::new(ScriptedAi::default());
        let mut item = Item::new("1", "Bottle");
        item.attributes
            .insert("brand".into(), FieldValue::new("Acme", FieldSource::Human));

        let output = phase(ai.clone())
            .execute(&item, &PhaseContext::default())
            .await
            .unwrap();

        assert_eq!(ai.asked.lock()[0], vec!["material".to_string(), "color".to_string()]);
        let PhaseOutput::Completed(outcome) = output else {
            panic!("expected completion output");
        };
        assert_eq!(outcome.applied_fields, vec!["material".to_string()]);
        assert_eq!(outcome.rejected_fields[0].reason, RejectReason::LowConfidence);
    }

    #[tokio::test]
    async fn test_fields_filled_by_an_earlier_run_are_not_asked_again() {
        let ai = Arc::new(ScriptedAi::default());
        let mut item = Item::new("1", "Bottle");
        item.attributes.insert(
            "material".into(),
            FieldValue::new("steel", FieldSource::Ai { confidence: 0.7 }),
        );

        phase(ai.clone())
            .execute(&item, &PhaseContext::default())
            .await
            .unwrap();

        assert_eq!(ai.asked.lock()[0], vec!["color".to_string(), "brand".to_string()]);
    }

    #[tokio::test]
    async fn test_skips_call_when_everything_is_authoritative() {
        let ai = Arc::new(ScriptedAi::default());
        let mut item = Item::new("1", "Bottle");
        for field in ["material", "color", "brand"] {
            item.attributes
                .insert(field.into(), FieldValue::new("x", FieldSource::Market));
        }

        let output = phase(ai.clone())
            .execute(&item, &PhaseContext::default())
            .await
            .unwrap();

        assert!(ai.asked.lock().is_empty());
        assert_eq!(output, PhaseOutput::Completed(MergeOutcome::default()));
    }
}
