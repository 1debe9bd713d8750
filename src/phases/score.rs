// Local listing score from margin, market demand and attribute completeness

use async_trait::async_trait;
use tracing::instrument;

use crate::core::errors::{ServiceError, ServiceResult};
use crate::core::types::{Item, PhaseName, PhaseOutput, ScoreBreakdown};
use crate::phases::{Phase, PhaseContext};

const MARGIN_WEIGHT: f64 = 0.5;
const DEMAND_WEIGHT: f64 = 0.3;
const COMPLETENESS_WEIGHT: f64 = 0.2;
/// Margin at which the margin component saturates
const FULL_MARGIN: f64 = 0.4;

pub struct ScorePhase {
    target_fields: Vec<String>,
}

impl ScorePhase {
    pub fn new(target_fields: Vec<String>) -> Self {
        Self { target_fields }
    }

    /// All components on a 0..=100 scale
    pub fn score(&self, item: &Item, margin: f64) -> ScoreBreakdown {
        let margin_score = (margin / FULL_MARGIN).clamp(0.0, 1.0) * 100.0;
        let demand = item
            .market
            .as_ref()
            .map(|m| f64::from(m.demand_score.min(100)))
            .unwrap_or(0.0);
        let completeness = if self.target_fields.is_empty() {
            100.0
        } else {
            let filled = self
                .target_fields
                .iter()
                .filter(|f| !item.needs_completion(f))
                .count();
            filled as f64 / self.target_fields.len() as f64 * 100.0
        };

        let total = MARGIN_WEIGHT * margin_score
            + DEMAND_WEIGHT * demand
            + COMPLETENESS_WEIGHT * completeness;

        ScoreBreakdown {
            total: (total * 10.0).round() / 10.0,
            margin: margin_score,
            demand,
            completeness,
        }
    }
}

#[async_trait]
impl Phase for ScorePhase {
    fn name(&self) -> PhaseName {
        PhaseName::Score
    }

    #[instrument(skip(self, item, _context), fields(item_id = %item.id))]
    async fn execute(&self, item: &Item, _context: &PhaseContext) -> ServiceResult<PhaseOutput> {
        let margin = item.profit_margin.ok_or_else(|| {
            ServiceError::Validation("score needs a profit margin".to_string())
        })?;
        Ok(PhaseOutput::Scored(self.score(item, margin)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ConfidenceLevel, FieldSource, FieldValue, MarketSignal};

    #[test]
    fn test_score_components() {
        let phase = ScorePhase::new(vec!["material".into(), "brand".into()]);
        let mut item = Item::new("1", "Bottle");
        item.market = Some(MarketSignal {
            sold_count: 40,
            avg_price: 20.0,
            recommended_price: 22.0,
            demand_score: 70,
            confidence_level: ConfidenceLevel::High,
        });
        item.attributes
            .insert("material".into(), FieldValue::new("steel", FieldSource::Ai { confidence: 0.8 }));

        let score = phase.score(&item, 0.2);
        assert_eq!(score.margin, 50.0);
        assert_eq!(score.demand, 70.0);
        assert_eq!(score.completeness, 50.0);
        assert_eq!(score.total, 56.0);
    }

    #[tokio::test]
    async fn test_missing_margin_fails() {
        let phase = ScorePhase::new(Vec::new());
        let result = phase
            .execute(&Item::new("1", "Bottle"), &PhaseContext::default())
            .await;
        assert!(matches!(result, Err(ServiceError::Validation(_))));
    }
}
