// Profit margin from price, cost and shipping

use async_trait::async_trait;
use std::sync::Arc;
use tracing::instrument;

use crate::core::errors::{ServiceError, ServiceResult};
use crate::core::types::{Item, PhaseName, PhaseOutput};
use crate::phases::{Phase, PhaseContext};
use crate::services::{CalculationService, RemoteCallExecutor};

pub struct ProfitPhase {
    service: Arc<dyn CalculationService>,
    executor: RemoteCallExecutor,
}

impl ProfitPhase {
    pub fn new(service: Arc<dyn CalculationService>, executor: RemoteCallExecutor) -> Self {
        Self { service, executor }
    }
}

#[async_trait]
impl Phase for ProfitPhase {
    fn name(&self) -> PhaseName {
        PhaseName::Profit
    }

    #[instrument(skip(self, item, _context), fields(item_id = %item.id))]
    async fn execute(&self, item: &Item, _context: &PhaseContext) -> ServiceResult<PhaseOutput> {
        let missing: Vec<&str> = [
            ("price", item.price.is_none()),
            ("cost", item.cost.is_none()),
            ("shipping_cost", item.shipping_cost.is_none()),
        ]
        .into_iter()
        .filter(|(_, absent)| *absent)
        .map(|(name, _)| name)
        .collect();

        if !missing.is_empty() {
            return Err(ServiceError::Validation(format!(
                "profit needs {}",
                missing.join(", ")
            )));
        }

        let estimate = self
            .executor
            .call("calculation", || self.service.compute_profit(item))
            .await?;
        Ok(PhaseOutput::Profit(estimate))
    }
}
