// Domain types for the enrichment pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::core::errors::{ErrorKind, PipelineError};

/// Opaque item identifier owned by the external catalog
pub type ItemId = String;

/// Enrichment phases, in default chain order first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseName {
    Classify,
    Shipping,
    Profit,
    SearchCompetitors,
    FetchDetail,
    AiComplete,
    Score,
    Translate,
    GenerateHtml,
}

impl PhaseName {
    /// The chain run by `run_all`; the selection gate sits between search and detail fetch
    pub const CHAIN: [PhaseName; 7] = [
        PhaseName::Classify,
        PhaseName::Shipping,
        PhaseName::Profit,
        PhaseName::SearchCompetitors,
        PhaseName::FetchDetail,
        PhaseName::AiComplete,
        PhaseName::Score,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseName::Classify => "classify",
            PhaseName::Shipping => "shipping",
            PhaseName::Profit => "profit",
            PhaseName::SearchCompetitors => "search-competitors",
            PhaseName::FetchDetail => "fetch-detail",
            PhaseName::AiComplete => "ai-complete",
            PhaseName::Score => "score",
            PhaseName::Translate => "translate",
            PhaseName::GenerateHtml => "generate-html",
        }
    }

    /// Phases that must wait for an open selection to be resolved
    pub fn is_gated(&self) -> bool {
        matches!(
            self,
            PhaseName::FetchDetail | PhaseName::AiComplete | PhaseName::Score
        )
    }
}

impl fmt::Display for PhaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhaseName {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "classify" => Ok(PhaseName::Classify),
            "shipping" => Ok(PhaseName::Shipping),
            "profit" => Ok(PhaseName::Profit),
            "search-competitors" | "search" => Ok(PhaseName::SearchCompetitors),
            "fetch-detail" | "detail" => Ok(PhaseName::FetchDetail),
            "ai-complete" => Ok(PhaseName::AiComplete),
            "score" => Ok(PhaseName::Score),
            "translate" => Ok(PhaseName::Translate),
            "generate-html" | "html" => Ok(PhaseName::GenerateHtml),
            other => Err(PipelineError::UnknownPhase(other.to_string())),
        }
    }
}

/// Who set an attribute value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    Human,
    Market,
    Ai { confidence: f64 },
    Unverified,
}

/// Attribute value with provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub value: String,
    pub source: FieldSource,
}

impl FieldValue {
    pub fn new(value: impl Into<String>, source: FieldSource) -> Self {
        Self {
            value: value.into(),
            source,
        }
    }

    /// Human-set or market-verified values are never replaced by AI output
    pub fn is_authoritative(&self) -> bool {
        matches!(self.source, FieldSource::Human | FieldSource::Market)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub length_cm: f64,
    pub width_cm: f64,
    pub height_cm: f64,
}

/// Product record snapshot (owned by the external store)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub title: String,
    #[serde(default)]
    pub translated_title: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub hs_code: Option<String>,
    /// Listing price in the destination market
    #[serde(default)]
    pub price: Option<f64>,
    /// Purchase cost in the source market
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub weight_g: Option<f64>,
    #[serde(default)]
    pub dimensions: Option<Dimensions>,
    #[serde(default)]
    pub shipping_cost: Option<f64>,
    #[serde(default)]
    pub profit_margin: Option<f64>,
    #[serde(default)]
    pub market: Option<MarketSignal>,
    #[serde(default)]
    pub competitor: Option<CompetitorDetail>,
    #[serde(default)]
    pub attributes: BTreeMap<String, FieldValue>,
    #[serde(default)]
    pub html_description: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
}

impl Item {
    pub fn new(id: impl Into<ItemId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn attribute(&self, field: &str) -> Option<&FieldValue> {
        self.attributes.get(field)
    }

    /// A field the AI phase may try to fill: absent, blank or explicitly unverified
    pub fn needs_completion(&self, field: &str) -> bool {
        match self.attributes.get(field) {
            None => true,
            Some(v) => v.value.trim().is_empty() || v.source == FieldSource::Unverified,
        }
    }
}

/// Output of the classification service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: String,
    pub category_id: String,
    #[serde(default)]
    pub hs_code: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShippingQuote {
    pub cost: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfitEstimate {
    pub margin: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    Low,
    Mid,
    High,
}

/// Demand and price signal returned alongside competitor candidates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSignal {
    pub sold_count: u32,
    pub avg_price: f64,
    pub recommended_price: f64,
    /// 0..=100
    pub demand_score: u8,
    pub confidence_level: ConfidenceLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitorCandidate {
    pub external_item_id: String,
    pub title: String,
    pub price: f64,
    pub match_confidence: f64,
    #[serde(default)]
    pub specifics: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSearch {
    pub candidates: Vec<CompetitorCandidate>,
    #[serde(default)]
    pub signal: Option<MarketSignal>,
}

/// Detail of the selected competitor listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitorDetail {
    pub external_item_id: String,
    /// Which backing provider answered
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub specifics: BTreeMap<String, String>,
    #[serde(default)]
    pub weight_g: Option<f64>,
    #[serde(default)]
    pub dimensions: Option<Dimensions>,
    #[serde(default)]
    pub origin_country: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
}

/// Gate state per item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Searched,
    AwaitingSelection,
    Selected,
    Skipped,
}

/// Operator decision submitted to the gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum SelectionDecision {
    Choose { external_item_id: String },
    Skip,
}

/// Terminal outcome of a selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub item_id: ItemId,
    pub chosen_candidate: Option<CompetitorCandidate>,
    pub skipped: bool,
}

/// One AI-suggested value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCompletion {
    pub field: String,
    pub value: String,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    LowConfidence,
    Authoritative,
    /// The item already carries a value for the field
    AlreadyFilled,
    /// Lost to a more confident completion in the same response
    NotImproved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedField {
    pub field: String,
    pub value: String,
    pub confidence: f64,
    pub reason: RejectReason,
}

/// Result of merging AI completions into an item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub updates: BTreeMap<String, FieldValue>,
    pub applied_fields: Vec<String>,
    pub rejected_fields: Vec<RejectedField>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub total: f64,
    pub margin: f64,
    pub demand: f64,
    pub completeness: f64,
}

/// Typed output of one phase for one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PhaseOutput {
    Classified(Classification),
    Shipping(ShippingQuote),
    Profit(ProfitEstimate),
    Searched(MarketSearch),
    Detail(CompetitorDetail),
    Completed(MergeOutcome),
    Scored(ScoreBreakdown),
    Translated { title: String },
    Html { html: String },
}

impl PhaseOutput {
    /// Fields this output writes back to the item
    pub fn to_update(&self) -> ItemUpdate {
        let mut update = ItemUpdate::default();
        match self {
            PhaseOutput::Classified(c) => {
                update.category = Some(c.category.clone());
                update.category_id = Some(c.category_id.clone());
                update.hs_code = c.hs_code.clone();
            }
            PhaseOutput::Shipping(s) => update.shipping_cost = Some(s.cost),
            PhaseOutput::Profit(p) => update.profit_margin = Some(p.margin),
            PhaseOutput::Searched(search) => update.market = search.signal.clone(),
            PhaseOutput::Detail(detail) => {
                // Market-verified values from the chosen listing
                let verified = detail
                    .specifics
                    .iter()
                    .map(|(k, v)| (k.to_lowercase(), v.clone()))
                    .chain(detail.brand.clone().map(|b| ("brand".to_string(), b)))
                    .chain(
                        detail
                            .origin_country
                            .clone()
                            .map(|c| ("origin_country".to_string(), c)),
                    );
                for (field, value) in verified {
                    if !value.trim().is_empty() {
                        update
                            .attributes
                            .insert(field, FieldValue::new(value, FieldSource::Market));
                    }
                }
                update.competitor = Some(detail.clone());
            }
            PhaseOutput::Completed(outcome) => update.attributes = outcome.updates.clone(),
            PhaseOutput::Scored(score) => update.score = Some(score.total),
            PhaseOutput::Translated { title } => update.translated_title = Some(title.clone()),
            PhaseOutput::Html { html } => update.html_description = Some(html.clone()),
        }
        update
    }
}

/// Partial write handed to the store; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemUpdate {
    pub translated_title: Option<String>,
    pub category: Option<String>,
    pub category_id: Option<String>,
    pub hs_code: Option<String>,
    pub shipping_cost: Option<f64>,
    pub profit_margin: Option<f64>,
    pub market: Option<MarketSignal>,
    pub competitor: Option<CompetitorDetail>,
    pub attributes: BTreeMap<String, FieldValue>,
    pub html_description: Option<String>,
    pub score: Option<f64>,
}

impl ItemUpdate {
    pub fn is_empty(&self) -> bool {
        *self == ItemUpdate::default()
    }

    pub fn apply(&self, item: &mut Item) {
        fn set<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
            if let Some(v) = value {
                *target = Some(v.clone());
            }
        }
        set(&mut item.translated_title, &self.translated_title);
        set(&mut item.category, &self.category);
        set(&mut item.category_id, &self.category_id);
        set(&mut item.hs_code, &self.hs_code);
        set(&mut item.shipping_cost, &self.shipping_cost);
        set(&mut item.profit_margin, &self.profit_margin);
        set(&mut item.market, &self.market);
        set(&mut item.competitor, &self.competitor);
        set(&mut item.html_description, &self.html_description);
        set(&mut item.score, &self.score);
        for (field, value) in &self.attributes {
            // A non-blank human value survives any write that is not itself human
            let keep_existing = item
                .attributes
                .get(field)
                .map(|existing| {
                    existing.source == FieldSource::Human
                        && !existing.value.trim().is_empty()
                        && value.source != FieldSource::Human
                })
                .unwrap_or(false);
            if !keep_existing {
                item.attributes.insert(field.clone(), value.clone());
            }
        }
    }
}

/// Per-item outcome of one phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult<T> {
    pub item_id: ItemId,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub duration_ms: f64,
}

impl<T> PhaseResult<T> {
    pub fn ok(item_id: ItemId, data: T, duration_ms: f64) -> Self {
        Self {
            item_id,
            success: true,
            data: Some(data),
            error_kind: None,
            error_message: None,
            duration_ms,
        }
    }

    pub fn failed(item_id: ItemId, kind: ErrorKind, message: impl Into<String>, duration_ms: f64) -> Self {
        Self {
            item_id,
            success: false,
            data: None,
            error_kind: Some(kind),
            error_message: Some(message.into()),
            duration_ms,
        }
    }
}

/// Why an item was held back from a phase without failing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferralReason {
    AwaitingSelection,
    SelectionSkipped,
    NoSelection,
}

impl DeferralReason {
    /// A skipped item sits out the detail fetch only and moves on without a competitor
    pub fn holds_item(&self) -> bool {
        !matches!(self, DeferralReason::SelectionSkipped)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredItem {
    pub item_id: ItemId,
    pub reason: DeferralReason,
}

/// Aggregate of one phase invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport<T> {
    pub phase: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<PhaseResult<T>>,
    pub errors: Vec<String>,
    #[serde(default)]
    pub deferred: Vec<DeferredItem>,
    #[serde(default)]
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub duration_ms: f64,
}

impl<T> BatchReport<T> {
    /// Build counts and `itemId: message` error lines from settled results
    pub fn from_results(
        phase: impl Into<String>,
        results: Vec<PhaseResult<T>>,
        started_at: DateTime<Utc>,
        duration_ms: f64,
    ) -> Self {
        let total = results.len();
        let succeeded = results.iter().filter(|r| r.success).count();
        let errors = results
            .iter()
            .filter(|r| !r.success)
            .map(|r| {
                format!(
                    "{}: {}",
                    r.item_id,
                    r.error_message.as_deref().unwrap_or("unknown error")
                )
            })
            .collect();
        Self {
            phase: phase.into(),
            total,
            succeeded,
            failed: total - succeeded,
            results,
            errors,
            deferred: Vec::new(),
            cancelled: false,
            started_at,
            duration_ms,
        }
    }

    /// A phase that dispatched work and got nothing back halts the chain
    pub fn is_phase_failure(&self) -> bool {
        self.total > 0 && self.succeeded == 0
    }
}

/// Concatenated reports for one `run_all`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainReport {
    pub run_id: Uuid,
    pub phases: Vec<BatchReport<PhaseOutput>>,
    pub overall_success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted_at: Option<PhaseName>,
    /// Items the chain could not advance past the selection gate
    pub awaiting_selection: Vec<ItemId>,
    pub cancelled: bool,
}

impl ChainReport {
    /// True when the chain ran to the end and no item was held back at the gate
    pub fn fully_advanced(&self) -> bool {
        self.halted_at.is_none()
            && !self.cancelled
            && self
                .phases
                .iter()
                .flat_map(|p| p.deferred.iter())
                .all(|d| !d.reason.holds_item())
    }
}

/// Progress notification emitted per settled item
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    pub phase: String,
    pub completed: usize,
    pub total: usize,
    pub item_id: ItemId,
    pub success: bool,
}
