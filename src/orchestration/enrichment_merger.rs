// Confidence-gated merge of AI field completions into an item

use tracing::debug;

use crate::core::types::{
    FieldCompletion, FieldSource, FieldValue, Item, MergeOutcome, RejectReason, RejectedField,
};

/// Minimum confidence for an AI value to be written
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.6;

/// Decides which AI completions may be written to an item.
///
/// A completion is applied when its confidence meets the threshold and the
/// item's field is blank or unverified. Filled values are never replaced,
/// whether a person, the market or an earlier AI run wrote them. Every
/// declined completion is reported with its reason.
#[derive(Debug, Clone, Copy)]
pub struct EnrichmentMerger {
    threshold: f64,
}

impl Default for EnrichmentMerger {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

impl EnrichmentMerger {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn merge(&self, item: &Item, completions: &[FieldCompletion]) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();

        for completion in completions {
            let checked = self
                .check(item.attribute(&completion.field), completion)
                .and_then(|()| match outcome.updates.get(&completion.field) {
                    // Completions for the same field in one response compete
                    Some(FieldValue {
                        source: FieldSource::Ai { confidence },
                        ..
                    }) if completion.confidence <= *confidence => Err(RejectReason::NotImproved),
                    _ => Ok(()),
                });

            match checked {
                Ok(()) => {
                    outcome.updates.insert(
                        completion.field.clone(),
                        FieldValue::new(
                            completion.value.clone(),
                            FieldSource::Ai {
                                confidence: completion.confidence,
                            },
                        ),
                    );
                    if !outcome.applied_fields.contains(&completion.field) {
                        outcome.applied_fields.push(completion.field.clone());
                    }
                }
                Err(reason) => {
                    debug!(
                        "Rejected {}={:?} ({:.2}) for item {}: {:?}",
                        completion.field, completion.value, completion.confidence, item.id, reason
                    );
                    outcome.rejected_fields.push(RejectedField {
                        field: completion.field.clone(),
                        value: completion.value.clone(),
                        confidence: completion.confidence,
                        reason,
                    });
                }
            }
        }

        outcome
    }

    fn check(&self, current: Option<&FieldValue>, completion: &FieldCompletion) -> Result<(), RejectReason> {
        let current = current.filter(|v| !v.value.trim().is_empty());
        if current.map(FieldValue::is_authoritative).unwrap_or(false) {
            return Err(RejectReason::Authoritative);
        }
        if completion.confidence.is_nan() || completion.confidence < self.threshold {
            return Err(RejectReason::LowConfidence);
        }
        match current {
            Some(v) if v.source != FieldSource::Unverified => Err(RejectReason::AlreadyFilled),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion(field: &str, value: &str, confidence: f64) -> FieldCompletion {
        FieldCompletion {
            field: field.to_string(),
            value: value.to_string(),
            confidence,
            reasoning: String::new(),
        }
    }

    #[test]
    fn test_threshold_boundary() {
        let merger = EnrichmentMerger::default();
        let item = Item::new("1", "Pan");

        let outcome = merger.merge(
            &item,
            &[completion("material", "iron", 0.59), completion("color", "black", 0.6)],
        );

        assert_eq!(outcome.applied_fields, vec!["color".to_string()]);
        assert_eq!(outcome.rejected_fields.len(), 1);
        assert_eq!(outcome.rejected_fields[0].field, "material");
        assert_eq!(outcome.rejected_fields[0].reason, RejectReason::LowConfidence);
        assert_eq!(
            outcome.updates["color"].source,
            FieldSource::Ai { confidence: 0.6 }
        );
    }

    #[test]
    fn test_human_value_never_overwritten() {
        let merger = EnrichmentMerger::default();
        let mut item = Item::new("1", "Pan");
        item.attributes
            .insert("brand".into(), FieldValue::new("Acme", FieldSource::Human));
        item.attributes
            .insert("origin_country".into(), FieldValue::new("JP", FieldSource::Market));

        let outcome = merger.merge(
            &item,
            &[completion("brand", "Other", 1.0), completion("origin_country", "CN", 0.99)],
        );

        assert!(outcome.updates.is_empty());
        assert!(outcome
            .rejected_fields
            .iter()
            .all(|r| r.reason == RejectReason::Authoritative));
    }

    #[test]
    fn test_unverified_and_blank_fields_are_fillable() {
        let merger = EnrichmentMerger::default();
        let mut item = Item::new("1", "Pan");
        item.attributes
            .insert("material".into(), FieldValue::new("maybe iron", FieldSource::Unverified));
        item.attributes
            .insert("color".into(), FieldValue::new("  ", FieldSource::Human));

        let outcome = merger.merge(
            &item,
            &[completion("material", "cast iron", 0.7), completion("color", "black", 0.7)],
        );

        assert_eq!(
            outcome.applied_fields,
            vec!["material".to_string(), "color".to_string()]
        );
        assert!(outcome.rejected_fields.is_empty());
    }

    #[test]
    fn test_earlier_ai_value_is_kept_even_against_higher_confidence() {
        let merger = EnrichmentMerger::default();
        let mut item = Item::new("1", "Pan");
        item.attributes.insert(
            "material".into(),
            FieldValue::new("steel", FieldSource::Ai { confidence: 0.7 }),
        );

        let outcome = merger.merge(&item, &[completion("material", "iron", 0.9)]);

        assert!(outcome.applied_fields.is_empty());
        assert!(outcome.updates.is_empty());
        assert_eq!(outcome.rejected_fields[0].reason, RejectReason::AlreadyFilled);
    }

    #[test]
    fn test_duplicate_completions_keep_most_confident() {
        let merger = EnrichmentMerger::default();
        let item = Item::new("1", "Pan");

        let outcome = merger.merge(
            &item,
            &[completion("color", "red", 0.7), completion("color", "blue", 0.65)],
        );

        assert_eq!(outcome.updates["color"].value, "red");
        assert_eq!(outcome.applied_fields, vec!["color".to_string()]);
        assert_eq!(outcome.rejected_fields[0].reason, RejectReason::NotImproved);
    }
}
