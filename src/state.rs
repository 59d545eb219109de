//! Per-instrument persisted state.
//!
//! Everything the engine needs to remember between cycles lives here and
//! round-trips through the store as one record. Score and narrative fields
//! are engine-owned; external writers touch only the evidence ledger and
//! the editorial override.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::evidence::{Diagnosticity, EvidenceItem};
use crate::logging::{self, obj, v_str, Domain};
use crate::narrative::{EditorialOverride, Hypothesis, NarrativeFlip};
use crate::overcorrection::OvercorrectionRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentState {
    pub instrument: String,
    /// Permanent creation order. Never resorted by score.
    pub hypotheses: Vec<Hypothesis>,
    /// Append-only evidence ledger.
    pub evidence: Vec<EvidenceItem>,
    pub overcorrection: Option<OvercorrectionRecord>,
    /// Append-only flip history, newest last.
    pub flips: Vec<NarrativeFlip>,
    pub override_lock: Option<EditorialOverride>,
    /// Consecutive cycles each hypothesis has held High conviction.
    pub high_streaks: HashMap<String, u32>,
    pub previous_dominant_id: Option<String>,
    /// Previous cycle's correlation top narrative.
    pub previous_top_id: Option<String>,
    pub last_cycle_date: Option<NaiveDate>,
}

impl InstrumentState {
    pub fn new(instrument: &str, hypotheses: Vec<Hypothesis>) -> Self {
        InstrumentState {
            instrument: instrument.to_string(),
            hypotheses,
            evidence: Vec::new(),
            overcorrection: None,
            flips: Vec::new(),
            override_lock: None,
            high_streaks: HashMap::new(),
            previous_dominant_id: None,
            previous_top_id: None,
            last_cycle_date: None,
        }
    }

    pub fn hypothesis(&self, id: &str) -> Option<&Hypothesis> {
        self.hypotheses.iter().find(|h| h.id == id)
    }

    /// Append an evidence item. Duplicate ids are skipped with a warning,
    /// which keeps re-submitted cycles from double-counting.
    pub fn append_evidence(&mut self, item: EvidenceItem) {
        if self.evidence.iter().any(|e| e.id == item.id) {
            logging::warn(
                Domain::Store,
                "duplicate_evidence_ignored",
                obj(&[("id", v_str(&item.id))]),
            );
            return;
        }
        self.evidence.push(item);
    }

    pub fn set_override(&mut self, lock: EditorialOverride) {
        logging::info(
            Domain::Narrative,
            "editorial_override_set",
            obj(&[("pinned", v_str(&lock.pinned_hypothesis_id))]),
        );
        self.override_lock = Some(lock);
    }

    pub fn clear_override(&mut self) {
        self.override_lock = None;
    }

    /// Evidence still in play, newest first.
    pub fn active_evidence(&self) -> Vec<&EvidenceItem> {
        let mut items: Vec<&EvidenceItem> = self.evidence.iter().filter(|e| e.active).collect();
        items.sort_by(|a, b| b.date.cmp(&a.date));
        items
    }

    /// Active evidence at High diagnosticity or above.
    pub fn high_diagnosticity_evidence(&self) -> Vec<&EvidenceItem> {
        self.active_evidence()
            .into_iter()
            .filter(|e| {
                matches!(e.diagnosticity, Diagnosticity::Critical | Diagnosticity::High)
            })
            .collect()
    }

    pub fn deactivate_evidence(&mut self, ids: &[String]) {
        for e in &mut self.evidence {
            if ids.iter().any(|id| id == &e.id) {
                e.active = false;
            }
        }
    }

    pub fn latest_flip(&self) -> Option<&NarrativeFlip> {
        self.flips.last()
    }
}
