//! Cycle orchestration.
//!
//! `evaluate_cycle` is pure: it reads an immutable instrument state and a
//! market snapshot and returns the full cycle result without touching
//! either. `Engine::run_cycle` wraps it with the only mutation point, the
//! atomic apply onto the instrument state, and refuses to re-apply a date
//! that has already been run.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::EngineConfig;
use crate::correlation::{self, CorrelationReport};
use crate::evidence::{self, EvidenceItem};
use crate::logging::{self, obj, v_num, v_str, Domain};
use crate::narrative::{self, NarrativeUpdate, TrackerContext};
use crate::normalizer;
use crate::overcorrection::{self, OvercorrectionRecord};
use crate::pipeline::{self, ClassificationMeta};
use crate::state::InstrumentState;

/// A known earnings event near this cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarningsContext {
    pub date: NaiveDate,
    pub surprise_pct: Option<f64>,
}

/// Optional external adjustment fed into the pipeline. Closed set; unknown
/// kinds fail deserialization at the edge and are dropped with a warning
/// there, never inside the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExternalSignal {
    Sentiment { value: f64, confidence: f64 },
    PerHypothesis { values: HashMap<String, f64>, confidence: f64 },
}

/// One cycle's market inputs, read once and immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleSnapshot {
    pub date: NaiveDate,
    pub current_price: f64,
    pub previous_close: f64,
    pub volume: f64,
    pub avg_20day_volume: f64,
    pub cumulative_5day_return: f64,
    #[serde(default)]
    pub earnings: Option<EarningsContext>,
    /// Oldest-first daily closes up to and including yesterday.
    pub price_history: Vec<f64>,
    #[serde(default)]
    pub external_signals: Vec<ExternalSignal>,
    /// Reason text of an immediate-flip signal, if one arrived.
    #[serde(default)]
    pub immediate_flip_trigger: Option<String>,
}

/// Everything one cycle produced. Applying this to the instrument state is
/// a separate step so evaluation stays side-effect free.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub date: NaiveDate,
    pub hypotheses: Vec<crate::narrative::Hypothesis>,
    pub narrative: Option<NarrativeUpdate>,
    pub correlation: Option<CorrelationReport>,
    pub overcorrection: Option<OvercorrectionRecord>,
    pub new_evidence: Vec<EvidenceItem>,
    pub expired_evidence_ids: Vec<String>,
    pub high_streaks: HashMap<String, u32>,
    pub meta: ClassificationMeta,
}

/// Evaluate one cycle without mutating anything.
///
/// Layer order is fixed: evidence decay seeds the raw accumulator, the
/// overcorrection monitor steps and proposes, the pipeline layers
/// accumulate, the normalizer projects onto the bounded simplex, the
/// tracker updates narrative state, and correlation reads the normalized
/// result independently.
pub fn evaluate_cycle(
    state: &InstrumentState,
    snapshot: &CycleSnapshot,
    now: DateTime<Utc>,
    cfg: &EngineConfig,
) -> CycleOutcome {
    let mut hypotheses = state.hypotheses.clone();
    let mut raw: HashMap<String, f64> =
        hypotheses.iter().map(|h| (h.id.clone(), h.survival_score)).collect();

    // Evidence decay layer.
    let scored = evidence::score_evidence(&state.evidence, snapshot.date, cfg);
    if !scored.expired_ids.is_empty() {
        logging::info(
            Domain::Evidence,
            "evidence_expired",
            obj(&[
                ("count", v_num(scored.expired_ids.len() as f64)),
                ("date", v_str(&snapshot.date.to_string())),
            ]),
        );
    }
    for (id, delta) in &scored.deltas {
        if let Some(total) = raw.get_mut(id) {
            *total += delta;
        }
    }
    // The staleness penalty is a cumulative total up to the cap, so only
    // the increment over what has already been taken applies this cycle.
    let mut staleness_targets: HashMap<String, f64> = HashMap::new();
    for h in &hypotheses {
        let target = evidence::staleness_penalty(h.last_updated, snapshot.date, cfg);
        let increment = (target - h.staleness_applied).max(0.0);
        if increment > 0.0 {
            if let Some(total) = raw.get_mut(&h.id) {
                *total -= increment;
            }
        }
        staleness_targets.insert(h.id.clone(), target.max(h.staleness_applied));
    }

    // Overcorrection monitor steps alongside the pipeline and only
    // proposes; the pipeline folds the proposal in.
    let single_day_pct = if snapshot.previous_close > 0.0 && snapshot.current_price.is_finite() {
        (snapshot.current_price - snapshot.previous_close) / snapshot.previous_close * 100.0
    } else {
        0.0
    };
    let monitor = overcorrection::step(
        state.overcorrection.as_ref(),
        snapshot.date,
        snapshot.current_price,
        snapshot.previous_close,
        single_day_pct,
        snapshot.cumulative_5day_return,
        cfg,
    );

    let piped = pipeline::run(&hypotheses, snapshot, monitor.proposal(), cfg);
    for (id, delta) in &piped.deltas {
        if let Some(total) = raw.get_mut(id) {
            *total += delta;
        }
    }

    // Normalize in permanent creation order.
    let raw_vec: Vec<f64> = hypotheses.iter().map(|h| raw[&h.id]).collect();
    let normalized = normalizer::normalize(&raw_vec, cfg);
    for (h, score) in hypotheses.iter_mut().zip(&normalized) {
        let touched = scored.deltas.get(&h.id).map(|d| *d != 0.0).unwrap_or(false)
            || piped.deltas.get(&h.id).map(|d| *d != 0.0).unwrap_or(false);
        h.survival_score = *score;
        if touched {
            h.last_updated = snapshot.date;
            h.staleness_applied = 0.0;
        } else if let Some(target) = staleness_targets.get(&h.id) {
            h.staleness_applied = *target;
        }
    }

    // Narrative tracker.
    let mut streaks = state.high_streaks.clone();
    let override_lock = state.override_lock.as_ref().filter(|o| o.is_live(now));
    let ctx = TrackerContext {
        date: snapshot.date,
        now,
        price: snapshot.current_price,
        volume: snapshot.volume,
        immediate_flip_trigger: snapshot.immediate_flip_trigger.as_deref(),
        override_lock,
    };
    let narrative = narrative::track(
        &mut hypotheses,
        &mut streaks,
        state.previous_dominant_id.as_deref(),
        &ctx,
        cfg,
    );

    // Correlation reads the normalized scores, never writes back.
    let mut closes = snapshot.price_history.clone();
    closes.push(snapshot.current_price);
    let report = correlation::evaluate(
        &hypotheses,
        &closes,
        state.previous_top_id.as_deref(),
        cfg,
    );

    logging::debug(
        Domain::System,
        "cycle_evaluated",
        obj(&[
            ("instrument", v_str(&state.instrument)),
            ("pct_change", v_num(piped.meta.pct_change)),
            ("new_evidence", v_num(piped.generated_evidence.len() as f64)),
        ]),
    );

    CycleOutcome {
        date: snapshot.date,
        hypotheses,
        narrative,
        correlation: report,
        overcorrection: monitor.record().cloned(),
        new_evidence: piped.generated_evidence,
        expired_evidence_ids: scored.expired_ids,
        high_streaks: streaks,
        meta: piped.meta,
    }
}

/// Applies cycle outcomes onto instrument state.
pub struct Engine {
    pub cfg: EngineConfig,
}

impl Engine {
    pub fn new(cfg: EngineConfig) -> Self {
        Engine { cfg }
    }

    /// Evaluate a cycle and fold the outcome into `state`.
    ///
    /// Re-running a date that has already been applied evaluates read-only
    /// and applies nothing, so identical inputs can be replayed without
    /// double-counting decay, evidence, or flips.
    pub fn run_cycle(
        &self,
        state: &mut InstrumentState,
        snapshot: &CycleSnapshot,
        now: DateTime<Utc>,
    ) -> CycleOutcome {
        let outcome = evaluate_cycle(state, snapshot, now, &self.cfg);
        if state.last_cycle_date == Some(snapshot.date) {
            logging::warn(
                Domain::System,
                "cycle_already_applied",
                obj(&[
                    ("instrument", v_str(&state.instrument)),
                    ("date", v_str(&snapshot.date.to_string())),
                ]),
            );
            return outcome;
        }
        apply(state, &outcome);
        outcome
    }
}

/// Fold one cycle's outcome into the instrument state. All fields move
/// together; persistence of the updated state is the caller's one final
/// step.
pub fn apply(state: &mut InstrumentState, outcome: &CycleOutcome) {
    state.hypotheses = outcome.hypotheses.clone();
    state.overcorrection = outcome.overcorrection.clone();
    state.high_streaks = outcome.high_streaks.clone();
    state.deactivate_evidence(&outcome.expired_evidence_ids);
    for item in &outcome.new_evidence {
        state.append_evidence(item.clone());
    }
    if let Some(update) = &outcome.narrative {
        if let Some(flip) = &update.flip {
            state.flips.push(flip.clone());
        }
        state.previous_dominant_id = Some(update.dominant_id.clone());
    }
    if let Some(report) = &outcome.correlation {
        state.previous_top_id = Some(report.top_id.clone());
    }
    state.last_cycle_date = Some(outcome.date);
}
