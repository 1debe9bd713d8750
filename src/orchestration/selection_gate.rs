// Operator selection checkpoint between competitor search and detail fetch
//
// Per item: Searched -> AwaitingSelection -> Selected | Skipped
// A skipped item sits out the detail fetch and continues without a competitor.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::core::errors::GateError;
use crate::core::types::{
    CompetitorCandidate, DeferralReason, GateState, ItemId, PhaseName, Selection,
    SelectionDecision,
};
use crate::utils::Metrics;

#[derive(Debug, Clone)]
struct GateEntry {
    state: GateState,
    candidates: Vec<CompetitorCandidate>,
    selection: Option<Selection>,
}

/// An item waiting on the operator, with what it can choose from
#[derive(Debug, Clone, Serialize)]
pub struct PendingSelection {
    pub item_id: ItemId,
    pub candidates: Vec<CompetitorCandidate>,
}

/// Typed selection state machine, shared between the orchestrator and the operator surface.
///
/// `resolve` is the only way out of `AwaitingSelection`. Callers either poll
/// `is_ready` or await `wait_for`.
#[derive(Default)]
pub struct SelectionGate {
    entries: RwLock<HashMap<ItemId, GateEntry>>,
    resolved: Notify,
    metrics: Option<Metrics>,
}

impl SelectionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(metrics: Metrics) -> Self {
        Self {
            metrics: Some(metrics),
            ..Self::default()
        }
    }

    /// Record search results for an item. Starts a new selection cycle.
    ///
    /// With candidates the item moves to `AwaitingSelection`; without, it stays
    /// `Searched` and has nothing to choose from.
    pub fn open(&self, item_id: &str, candidates: Vec<CompetitorCandidate>) -> GateState {
        let state = if candidates.is_empty() {
            GateState::Searched
        } else {
            GateState::AwaitingSelection
        };

        let previous = self.entries.write().insert(
            item_id.to_string(),
            GateEntry {
                state,
                candidates,
                selection: None,
            },
        );
        if let Some(previous) = previous {
            debug!(
                "Item {} re-searched, previous gate state {:?} replaced",
                item_id, previous.state
            );
        }
        state
    }

    /// Apply the operator's decision
    pub fn resolve(&self, item_id: &str, decision: SelectionDecision) -> Result<Selection, GateError> {
        let selection = {
            let mut entries = self.entries.write();
            let entry = match entries.get_mut(item_id) {
                Some(entry) if entry.state == GateState::AwaitingSelection => entry,
                other => {
                    return Err(GateError::InvalidState {
                        item_id: item_id.to_string(),
                        state: other.map(|e| e.state),
                    })
                }
            };

            let selection = match decision {
                SelectionDecision::Choose { external_item_id } => {
                    let candidate = entry
                        .candidates
                        .iter()
                        .find(|c| c.external_item_id == external_item_id)
                        .cloned()
                        .ok_or_else(|| GateError::UnknownCandidate {
                            item_id: item_id.to_string(),
                            external_item_id: external_item_id.clone(),
                        })?;
                    entry.state = GateState::Selected;
                    Selection {
                        item_id: item_id.to_string(),
                        chosen_candidate: Some(candidate),
                        skipped: false,
                    }
                }
                SelectionDecision::Skip => {
                    entry.state = GateState::Skipped;
                    Selection {
                        item_id: item_id.to_string(),
                        chosen_candidate: None,
                        skipped: true,
                    }
                }
            };
            entry.selection = Some(selection.clone());
            selection
        };

        info!(
            "Selection for item {}: {}",
            item_id,
            match selection.chosen_candidate {
                Some(ref c) => c.external_item_id.as_str(),
                None => "skipped",
            }
        );
        if let Some(ref m) = self.metrics {
            m.record_selection(selection.skipped);
        }
        self.resolved.notify_waiters();
        Ok(selection)
    }

    /// True once a candidate has been chosen
    pub fn is_ready(&self, item_id: &str) -> bool {
        self.state(item_id) == Some(GateState::Selected)
    }

    pub fn state(&self, item_id: &str) -> Option<GateState> {
        self.entries.read().get(item_id).map(|e| e.state)
    }

    pub fn selection(&self, item_id: &str) -> Option<Selection> {
        self.entries
            .read()
            .get(item_id)
            .and_then(|e| e.selection.clone())
    }

    /// The chosen candidate, if the item is ready
    pub fn chosen(&self, item_id: &str) -> Option<CompetitorCandidate> {
        self.selection(item_id).and_then(|s| s.chosen_candidate)
    }

    /// Why `phase` may not run for this item yet, or `None` if it may
    pub fn deferral_reason(&self, phase: PhaseName, item_id: &str) -> Option<DeferralReason> {
        match self.state(item_id) {
            Some(GateState::Selected) => None,
            Some(GateState::Skipped) if phase != PhaseName::FetchDetail => None,
            Some(GateState::Skipped) => Some(DeferralReason::SelectionSkipped),
            Some(GateState::AwaitingSelection) => Some(DeferralReason::AwaitingSelection),
            Some(GateState::Searched) | None => Some(DeferralReason::NoSelection),
        }
    }

    /// Items awaiting a decision, ordered by id
    pub fn pending(&self) -> Vec<PendingSelection> {
        let mut pending: Vec<_> = self
            .entries
            .read()
            .iter()
            .filter(|(_, e)| e.state == GateState::AwaitingSelection)
            .map(|(id, e)| PendingSelection {
                item_id: id.clone(),
                candidates: e.candidates.clone(),
            })
            .collect();
        pending.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        pending
    }

    /// End the selection cycle for an item
    pub fn clear(&self, item_id: &str) -> bool {
        self.entries.write().remove(item_id).is_some()
    }

    /// Wait until the item's selection is resolved.
    ///
    /// Fails immediately with `InvalidState` if the item is not in the gate or
    /// has no candidates, since nothing could ever resolve it.
    pub async fn wait_for(&self, item_id: &str) -> Result<Selection, GateError> {
        loop {
            // Registered before the state check so a resolve in between is not missed
            let notified = self.resolved.notified();

            {
                let entries = self.entries.read();
                match entries.get(item_id) {
                    Some(GateEntry {
                        selection: Some(selection),
                        ..
                    }) => return Ok(selection.clone()),
                    Some(entry) if entry.state == GateState::AwaitingSelection => {}
                    other => {
                        return Err(GateError::InvalidState {
                            item_id: item_id.to_string(),
                            state: other.map(|e| e.state),
                        })
                    }
                }
            }

            notified.await;
        }
    }
}
