// Detail of the operator-selected competitor listing, with provider fallback

use async_trait::async_trait;
use std::sync::Arc;
use tracing::instrument;

use crate::core::errors::{ServiceError, ServiceResult};
use crate::core::types::{Item, PhaseName, PhaseOutput};
use crate::phases::{Phase, PhaseContext};
use crate::services::{ItemDetailProvider, RemoteCallExecutor};

pub struct FetchDetailPhase {
    providers: Vec<(String, Arc<dyn ItemDetailProvider>)>,
    executor: RemoteCallExecutor,
}

impl FetchDetailPhase {
    /// `providers` are tried in order
    pub fn new(providers: Vec<Arc<dyn ItemDetailProvider>>, executor: RemoteCallExecutor) -> Self {
        let providers = providers
            .into_iter()
            .map(|p| (p.name().to_string(), p))
            .collect();
        Self { providers, executor }
    }
}

#[async_trait]
impl Phase for FetchDetailPhase {
    fn name(&self) -> PhaseName {
        PhaseName::FetchDetail
    }

    #[instrument(skip(self, item, context), fields(item_id = %item.id))]
    async fn execute(&self, item: &Item, context: &PhaseContext) -> ServiceResult<PhaseOutput> {
        let candidate = context.selection.as_ref().ok_or_else(|| {
            ServiceError::Validation(format!("no competitor selected for item {}", item.id))
        })?;
        let external_id = candidate.external_item_id.as_str();

        let (mut detail, provider) = self
            .executor
            .call_with_fallback(&self.providers, |p| async move {
                p.fetch_detail(external_id).await
            })
            .await?;

        detail.provider = provider;
        if detail.external_item_id.is_empty() {
            detail.external_item_id = external_id.to_string();
        }
        // Search-time specifics fill gaps the detail call left
        for (key, value) in &candidate.specifics {
            detail
                .specifics
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        Ok(PhaseOutput::Detail(detail))
    }
}
