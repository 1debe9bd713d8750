// International shipping cost

use async_trait::async_trait;
use std::sync::Arc;
use tracing::instrument;

use crate::core::errors::{ServiceError, ServiceResult};
use crate::core::types::{Item, PhaseName, PhaseOutput};
use crate::phases::{Phase, PhaseContext};
use crate::services::{CalculationService, RemoteCallExecutor};

pub struct ShippingPhase {
    service: Arc<dyn CalculationService>,
    executor: RemoteCallExecutor,
}

impl ShippingPhase {
    pub fn new(service: Arc<dyn CalculationService>, executor: RemoteCallExecutor) -> Self {
        Self { service, executor }
    }
}

#[async_trait]
impl Phase for ShippingPhase {
    fn name(&self) -> PhaseName {
        PhaseName::Shipping
    }

    #[instrument(skip(self, item, context), fields(item_id = %item.id))]
    async fn execute(&self, item: &Item, context: &PhaseContext) -> ServiceResult<PhaseOutput> {
        // Fall back to the competitor's measurements when the item has none
        let mut item = item.clone();
        if let Some(ref detail) = context.competitor {
            item.weight_g = item.weight_g.or(detail.weight_g);
            item.dimensions = item.dimensions.or(detail.dimensions);
        }

        if item.weight_g.is_none() && item.dimensions.is_none() {
            return Err(ServiceError::Validation(
                "weight or dimensions required for shipping".to_string(),
            ));
        }

        let quote = self
            .executor
            .call("calculation", || self.service.compute_shipping(&item))
            .await?;

        if !quote.cost.is_finite() || quote.cost < 0.0 {
            return Err(ServiceError::InvalidResponse(format!(
                "shipping cost {} out of range",
                quote.cost
            )));
        }
        Ok(PhaseOutput::Shipping(quote))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{CompetitorDetail, ProfitEstimate, ShippingQuote};
    use crate::services::RetryPolicy;
    use std::collections::BTreeMap;
    use std::time::Duration;

    struct PerGram;

    #[async_trait]
    impl CalculationService for PerGram {
        async fn compute_shipping(&self, item: &Item) -> ServiceResult<ShippingQuote> {
            Ok(ShippingQuote {
                cost: item.weight_g.unwrap_or(0.0) / 100.0,
            })
        }

        async fn compute_profit(&self, _item: &Item) -> ServiceResult<ProfitEstimate> {
            Ok(ProfitEstimate { margin: 0.0 })
        }
    }

    fn phase() -> ShippingPhase {
        ShippingPhase::new(
            Arc::new(PerGram),
            RemoteCallExecutor::new(RetryPolicy::new(1, Duration::ZERO, Duration::from_secs(1))),
        )
    }

    #[tokio::test]
    async fn test_missing_measurements_fail_validation() {
        let result = phase()
            .execute(&Item::new("1", "Lamp"), &PhaseContext::default())
            .await;
        assert!(matches!(result, Err(ServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn test_uses_competitor_weight_when_item_has_none() {
        let context = PhaseContext {
            competitor: Some(CompetitorDetail {
                external_item_id: "ext".into(),
                provider: "primary".into(),
                specifics: BTreeMap::new(),
                weight_g: Some(500.0),
                dimensions: None,
                origin_country: None,
                brand: None,
            }),
            ..Default::default()
        };

        let output = phase()
            .execute(&Item::new("1", "Lamp"), &context)
            .await
            .unwrap();
        assert_eq!(output, PhaseOutput::Shipping(ShippingQuote { cost: 5.0 }));
    }
}
