//! Evidence ledger and time-decay model.
//!
//! Every evidence item carries a diagnosticity weight, a per-hypothesis
//! impact, and decay parameters. Items contribute
//! `weight * decay * impact_sign` to a hypothesis's raw score each cycle and
//! drop out of the active set once their decay factor becomes negligible.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::EngineConfig;

/// How strongly an item discriminates between hypotheses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Diagnosticity {
    Critical,
    High,
    Medium,
    Low,
}

impl Diagnosticity {
    pub fn weight(&self) -> f64 {
        match self {
            Diagnosticity::Critical => 3.0,
            Diagnosticity::High => 2.0,
            Diagnosticity::Medium => 1.0,
            Diagnosticity::Low => 0.5,
        }
    }
}

/// Direction of an item's bearing on a single hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Impact {
    Consistent,
    Inconsistent,
    Neutral,
}

impl Impact {
    pub fn sign(&self) -> f64 {
        match self {
            Impact::Consistent => 1.0,
            Impact::Inconsistent => -1.0,
            Impact::Neutral => 0.0,
        }
    }
}

/// Where an evidence item came from. Engine-generated signals are kept in
/// the same ledger as editorial items so the audit trail is uniform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    Editorial,
    PriceSignal,
    TechnicalSignal,
    OvercorrectionSignal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DecayParams {
    /// Days at full weight before decay begins.
    pub full_weight_days: u32,
    /// Halving period after full weight ends. Zero or negative means the
    /// item never decays (structurally enduring evidence).
    pub half_life_days: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub id: String,
    pub date: NaiveDate,
    pub diagnosticity: Diagnosticity,
    /// Impact per hypothesis id. Hypotheses absent from the map are Neutral.
    pub impacts: HashMap<String, Impact>,
    pub decay: Option<DecayParams>,
    pub active: bool,
    pub source: EvidenceSource,
    pub note: String,
}

impl EvidenceItem {
    /// Decay factor for this item at `now`, falling back to the configured
    /// default parameters when the item carries none.
    pub fn decay_factor(&self, now: NaiveDate, cfg: &EngineConfig) -> f64 {
        let params = self.decay.unwrap_or(DecayParams {
            full_weight_days: cfg.default_full_weight_days,
            half_life_days: cfg.default_half_life_days,
        });
        decay_factor(self.date, now, params)
    }
}

/// Time-decay multiplier in [0, 1].
///
/// 1.0 while `days_since <= full_weight_days`, then
/// `0.5 ^ ((days_since - full_weight_days) / half_life_days)`. A half-life
/// of zero or below means the item holds full weight forever. Evidence
/// dated in the future keeps full weight rather than erroring.
pub fn decay_factor(evidence_date: NaiveDate, now: NaiveDate, params: DecayParams) -> f64 {
    let days_since = (now - evidence_date).num_days();
    if days_since <= params.full_weight_days as i64 {
        return 1.0;
    }
    if params.half_life_days <= 0.0 {
        return 1.0;
    }
    let excess = (days_since - params.full_weight_days as i64) as f64;
    0.5_f64.powf(excess / params.half_life_days)
}

/// Result of one evidence-scoring pass.
#[derive(Debug, Clone, Default)]
pub struct EvidenceScores {
    /// Raw-score delta per hypothesis id.
    pub deltas: HashMap<String, f64>,
    /// Items whose decay factor fell below the cutoff this cycle.
    pub expired_ids: Vec<String>,
}

/// Score all active evidence against the hypothesis set.
///
/// Items below the decay cutoff contribute nothing and are reported in
/// `expired_ids` so the caller can flip their `active` flags. Empty
/// evidence yields empty deltas: scores stay where they were.
pub fn score_evidence(
    evidence: &[EvidenceItem],
    now: NaiveDate,
    cfg: &EngineConfig,
) -> EvidenceScores {
    let mut out = EvidenceScores::default();
    for item in evidence.iter().filter(|e| e.active) {
        let decay = item.decay_factor(now, cfg);
        if decay < cfg.decay_cutoff {
            out.expired_ids.push(item.id.clone());
            continue;
        }
        let weight = item.diagnosticity.weight();
        for (hyp_id, impact) in &item.impacts {
            let delta = weight * decay * impact.sign();
            if delta != 0.0 {
                *out.deltas.entry(hyp_id.clone()).or_insert(0.0) += delta;
            }
        }
    }
    out
}

/// Total penalty for a hypothesis whose evidence trail has gone quiet.
///
/// ~`staleness_points_per_week` per full week beyond the grace period,
/// capped at `staleness_cap`. This is the cumulative amount owed since
/// `last_updated`; callers that apply it per cycle must charge only the
/// increment over what has already been taken.
pub fn staleness_penalty(last_updated: NaiveDate, now: NaiveDate, cfg: &EngineConfig) -> f64 {
    let stale_days = (now - last_updated).num_days() - cfg.staleness_grace_days;
    if stale_days <= 0 {
        return 0.0;
    }
    let weeks = (stale_days / 7) as f64;
    (weeks * cfg.staleness_points_per_week).min(cfg.staleness_cap)
}
