//! Narrative state tracker.
//!
//! Hypothesis identity is permanent; dominance moves between hypotheses only
//! through a recorded flip. The tracker applies hysteresis: a challenger
//! overtaking the incumbent on raw score is not enough; it must sustain
//! high conviction while the incumbent fades, or arrive with an explicit
//! immediate-flip trigger.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::{EngineConfig, HIGH_CONVICTION_RATIO};
use crate::logging::{self, obj, v_num, v_str, Domain};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stance {
    Bullish,
    Bearish,
    Neutral,
}

impl Stance {
    /// Signed direction: +1 bullish, -1 bearish, 0 neutral.
    pub fn direction(&self) -> f64 {
        match self {
            Stance::Bullish => 1.0,
            Stance::Bearish => -1.0,
            Stance::Neutral => 0.0,
        }
    }

    /// Whether this stance is aligned with a signed price move.
    pub fn aligned_with(&self, move_sign: f64) -> bool {
        self.direction() != 0.0 && self.direction() == move_sign.signum()
    }
}

/// Conviction band derived from the 0-100 survival score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusBand {
    VeryLow,
    Low,
    Moderate,
    High,
}

impl StatusBand {
    pub fn from_score(score: f64) -> Self {
        let ratio = score / 100.0;
        if ratio >= HIGH_CONVICTION_RATIO {
            StatusBand::High
        } else if ratio >= 0.4 {
            StatusBand::Moderate
        } else if ratio >= 0.2 {
            StatusBand::Low
        } else {
            StatusBand::VeryLow
        }
    }
}

/// A competing thesis about the instrument. `id` is never reassigned and
/// the hypothesis array is always kept in creation order for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hypothesis {
    pub id: String,
    pub name: String,
    pub stance: Stance,
    pub survival_score: f64,
    pub status: StatusBand,
    pub created_at: NaiveDate,
    pub last_updated: NaiveDate,
    /// Staleness points already taken since `last_updated`. The penalty is
    /// cumulative up to a cap, so the engine applies only the increment
    /// each cycle; resets when the hypothesis is touched again.
    #[serde(default)]
    pub staleness_applied: f64,
    pub dominant: bool,
}

impl Hypothesis {
    pub fn new(id: &str, name: &str, stance: Stance, score: f64, created_at: NaiveDate) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            stance,
            survival_score: score,
            status: StatusBand::from_score(score),
            created_at,
            last_updated: created_at,
            staleness_applied: 0.0,
            dominant: false,
        }
    }
}

/// Append-only record of a dominance change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeFlip {
    pub from_id: String,
    pub from_score: f64,
    pub to_id: String,
    pub to_score: f64,
    pub trigger: String,
    pub price: f64,
    pub volume: f64,
    pub date: NaiveDate,
}

/// Editorial lock pinning the displayed dominant until expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditorialOverride {
    pub pinned_hypothesis_id: String,
    pub reason: String,
    pub expires_at: DateTime<Utc>,
}

impl EditorialOverride {
    /// Expiry is evaluated against the clock every cycle, never cached.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NarrativeState {
    Normal,
    Alert,
    Flip,
    Override,
}

/// Per-cycle narrative outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeUpdate {
    pub state: NarrativeState,
    pub dominant_id: String,
    pub previous_dominant_id: Option<String>,
    /// What consumers should display: the override target while an override
    /// is live, otherwise the computed dominant.
    pub displayed_dominant_id: String,
    pub alert: bool,
    pub flip: Option<NarrativeFlip>,
}

/// Cycle context for the tracker.
pub struct TrackerContext<'a> {
    pub date: NaiveDate,
    pub now: DateTime<Utc>,
    pub price: f64,
    pub volume: f64,
    /// Reason text of an immediate-flip signal, if one arrived this cycle.
    pub immediate_flip_trigger: Option<&'a str>,
    pub override_lock: Option<&'a EditorialOverride>,
}

/// Recompute status bands, streaks, dominance, alert and flip for one cycle.
///
/// `streaks` counts consecutive cycles each hypothesis has held High; the
/// caller persists it between cycles. Returns None when the hypothesis set
/// is degenerate (< 2 entries dominance logic is skipped; 0 entries nothing
/// can be computed).
pub fn track(
    hypotheses: &mut [Hypothesis],
    streaks: &mut HashMap<String, u32>,
    previous_dominant: Option<&str>,
    ctx: &TrackerContext,
    cfg: &EngineConfig,
) -> Option<NarrativeUpdate> {
    if hypotheses.is_empty() {
        return None;
    }

    for h in hypotheses.iter_mut() {
        h.status = StatusBand::from_score(h.survival_score);
        let streak = streaks.entry(h.id.clone()).or_insert(0);
        if h.status == StatusBand::High {
            *streak += 1;
        } else {
            *streak = 0;
        }
    }

    if hypotheses.len() < 2 {
        // Degenerate set: the only hypothesis is trivially dominant,
        // alert/flip logic does not apply.
        let only = &mut hypotheses[0];
        only.dominant = true;
        let id = only.id.clone();
        return Some(NarrativeUpdate {
            state: NarrativeState::Normal,
            dominant_id: id.clone(),
            previous_dominant_id: previous_dominant.map(str::to_string),
            displayed_dominant_id: id.clone(),
            alert: false,
            flip: None,
        });
    }

    let challenger_idx = argmax(hypotheses, previous_dominant);
    let incumbent_idx = previous_dominant.and_then(|id| hypotheses.iter().position(|h| h.id == id));

    let mut flip: Option<NarrativeFlip> = None;
    let dominant_idx = match incumbent_idx {
        // First cycle: argmax is seated without a flip record.
        None => challenger_idx,
        Some(inc) if inc == challenger_idx => inc,
        Some(inc) => {
            let challenger = &hypotheses[challenger_idx];
            let incumbent = &hypotheses[inc];
            let streak = streaks.get(&challenger.id).copied().unwrap_or(0);

            let confirmed = incumbent.status <= StatusBand::Low
                && challenger.status == StatusBand::High
                && streak >= cfg.flip_confirmation_days;
            let immediate = ctx.immediate_flip_trigger.is_some()
                && cfg.immediate_flip_bypasses_confirmation;

            if confirmed || immediate {
                let trigger = match ctx.immediate_flip_trigger {
                    Some(reason) if immediate => reason.to_string(),
                    _ => format!(
                        "{} sustained high conviction for {} sessions while {} faded",
                        challenger.id, streak, incumbent.id
                    ),
                };
                flip = Some(NarrativeFlip {
                    from_id: incumbent.id.clone(),
                    from_score: incumbent.survival_score,
                    to_id: challenger.id.clone(),
                    to_score: challenger.survival_score,
                    trigger,
                    price: ctx.price,
                    volume: ctx.volume,
                    date: ctx.date,
                });
                challenger_idx
            } else {
                if ctx.immediate_flip_trigger.is_some() {
                    logging::info(
                        Domain::Narrative,
                        "immediate_flip_suppressed",
                        obj(&[("reason", v_str(ctx.immediate_flip_trigger.unwrap_or("")))]),
                    );
                }
                inc
            }
        }
    };

    for (i, h) in hypotheses.iter_mut().enumerate() {
        h.dominant = i == dominant_idx;
    }
    let dominant = &hypotheses[dominant_idx];

    // ALERT: incumbent conviction has sagged while a rival runs high.
    let alert = dominant.status <= StatusBand::Moderate
        && hypotheses
            .iter()
            .enumerate()
            .any(|(i, h)| i != dominant_idx && h.status == StatusBand::High);

    let override_live = ctx
        .override_lock
        .filter(|o| o.is_live(ctx.now))
        .filter(|o| hypotheses.iter().any(|h| h.id == o.pinned_hypothesis_id));

    let state = if override_live.is_some() {
        NarrativeState::Override
    } else if flip.is_some() {
        NarrativeState::Flip
    } else if alert {
        NarrativeState::Alert
    } else {
        NarrativeState::Normal
    };

    if let Some(f) = &flip {
        logging::info(
            Domain::Narrative,
            "narrative_flip",
            obj(&[
                ("from", v_str(&f.from_id)),
                ("to", v_str(&f.to_id)),
                ("price", v_num(f.price)),
            ]),
        );
    }

    Some(NarrativeUpdate {
        state,
        dominant_id: dominant.id.clone(),
        previous_dominant_id: previous_dominant.map(str::to_string),
        displayed_dominant_id: override_live
            .map(|o| o.pinned_hypothesis_id.clone())
            .unwrap_or_else(|| dominant.id.clone()),
        alert,
        flip,
    })
}

/// Index of the highest-scoring hypothesis. Ties resolve to the incumbent
/// when it is among the leaders, otherwise to the earliest created.
fn argmax(hypotheses: &[Hypothesis], incumbent: Option<&str>) -> usize {
    let best = hypotheses
        .iter()
        .map(|h| h.survival_score)
        .fold(f64::MIN, f64::max);
    let leaders: Vec<usize> = hypotheses
        .iter()
        .enumerate()
        .filter(|(_, h)| h.survival_score == best)
        .map(|(i, _)| i)
        .collect();
    if let Some(inc) = incumbent {
        if let Some(&i) = leaders.iter().find(|&&i| hypotheses[i].id == inc) {
            return i;
        }
    }
    // Creation order is the array order, so the first leader is the earliest.
    leaders[0]
}
