//! Overcorrection monitor.
//!
//! A pure per-instrument state machine that flags suspected price
//! dislocations and resolves them after a trading-day window. It never
//! writes scores itself: a resolution judged fundamental only *proposes* an
//! adjustment, which the pipeline folds into the raw-score accumulator.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::calendar::add_trading_days;
use crate::config::EngineConfig;
use crate::logging::{self, obj, v_num, v_str, Domain};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorStatus {
    Monitoring,
    ConfirmedOvercorrection,
    FundamentalMove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveDirection {
    Up,
    Down,
}

impl MoveDirection {
    pub fn sign(&self) -> f64 {
        match self {
            MoveDirection::Up => 1.0,
            MoveDirection::Down => -1.0,
        }
    }
}

/// Why the monitor opened. Both fields set when both thresholds fired on
/// the same session.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TriggerReasons {
    pub single_day_pct: Option<f64>,
    pub cumulative_5d_pct: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OvercorrectionRecord {
    pub trigger_date: NaiveDate,
    /// Close on the trigger session (post-move).
    pub trigger_price: f64,
    /// Close immediately before the move, the level reversal is measured
    /// against.
    pub pre_trigger_price: f64,
    pub direction: MoveDirection,
    pub resolution_date: NaiveDate,
    pub status: MonitorStatus,
    pub reasons: TriggerReasons,
    pub extensions: u32,
    pub resolved_date: Option<NaiveDate>,
}

impl OvercorrectionRecord {
    /// Fraction of the dislocation retraced toward the pre-trigger level.
    /// Sign-aware: recovery after a down move and give-back after an up
    /// move both read positive; continuation reads negative.
    pub fn reversal_fraction(&self, current_price: f64) -> f64 {
        let span = self.pre_trigger_price - self.trigger_price;
        if span.abs() < f64::EPSILON || !current_price.is_finite() {
            return 0.0;
        }
        (current_price - self.trigger_price) / span
    }
}

/// Score adjustment proposed by a resolution, to be applied by the pipeline
/// to hypotheses whose stance aligns with the move direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProposedAdjustment {
    pub direction: MoveDirection,
    pub points: f64,
}

/// One cycle's step of the monitor state machine.
#[derive(Debug, Clone)]
pub enum MonitorStep {
    /// No record and nothing triggered.
    Idle,
    /// A new record opened this cycle.
    Opened(OvercorrectionRecord),
    /// An existing record is still inside its window (or a resolved record
    /// is simply carried forward).
    Holding(OvercorrectionRecord),
    /// Partial reversal: the window was extended.
    Extended(OvercorrectionRecord),
    /// The record resolved; a fundamental move carries a proposal.
    Resolved {
        record: OvercorrectionRecord,
        proposal: Option<ProposedAdjustment>,
    },
}

impl MonitorStep {
    pub fn record(&self) -> Option<&OvercorrectionRecord> {
        match self {
            MonitorStep::Idle => None,
            MonitorStep::Opened(r)
            | MonitorStep::Holding(r)
            | MonitorStep::Extended(r) => Some(r),
            MonitorStep::Resolved { record, .. } => Some(record),
        }
    }

    pub fn proposal(&self) -> Option<ProposedAdjustment> {
        match self {
            MonitorStep::Resolved { proposal, .. } => *proposal,
            _ => None,
        }
    }
}

/// Advance the monitor by one cycle.
///
/// Entry fires on `|single-day %| >= single_day_pct` or `|5-day cumulative %|
/// >= cumulative_pct`; both reasons are recorded when both fire. A new
/// trigger is ignored while a record is already monitoring
/// (first-trigger-wins). Resolution is evaluated only once the resolution
/// date has been reached; checking earlier is a no-op.
pub fn step(
    existing: Option<&OvercorrectionRecord>,
    date: NaiveDate,
    price: f64,
    prev_close: f64,
    single_day_pct: f64,
    cumulative_5d_pct: f64,
    cfg: &EngineConfig,
) -> MonitorStep {
    if let Some(record) = existing {
        if record.status == MonitorStatus::Monitoring {
            if date < record.resolution_date {
                return MonitorStep::Holding(record.clone());
            }
            return resolve(record, date, price, cfg);
        }
        // A resolved record stays on file; only a fresh trigger replaces it.
    }

    let single = single_day_pct.is_finite() && single_day_pct.abs() >= cfg.overcorrection_single_day_pct;
    let cumulative =
        cumulative_5d_pct.is_finite() && cumulative_5d_pct.abs() >= cfg.overcorrection_cumulative_pct;
    if !single && !cumulative {
        return match existing {
            Some(r) => MonitorStep::Holding(r.clone()),
            None => MonitorStep::Idle,
        };
    }

    let driving_pct = if single { single_day_pct } else { cumulative_5d_pct };
    let direction = if driving_pct < 0.0 { MoveDirection::Down } else { MoveDirection::Up };
    // Reversal is measured against where the dislocation started: yesterday's
    // close for a single-day trigger, the 5-day starting level when only the
    // cumulative threshold fired.
    let pre_trigger_price = if single {
        prev_close
    } else {
        let base = 1.0 + cumulative_5d_pct / 100.0;
        if base > 0.0 { price / base } else { prev_close }
    };
    let record = OvercorrectionRecord {
        trigger_date: date,
        trigger_price: price,
        pre_trigger_price,
        direction,
        resolution_date: add_trading_days(date, cfg.overcorrection_window_days),
        status: MonitorStatus::Monitoring,
        reasons: TriggerReasons {
            single_day_pct: single.then_some(single_day_pct),
            cumulative_5d_pct: cumulative.then_some(cumulative_5d_pct),
        },
        extensions: 0,
        resolved_date: None,
    };
    logging::info(
        Domain::Overcorrection,
        "monitor_opened",
        obj(&[
            ("direction", v_str(if driving_pct < 0.0 { "down" } else { "up" })),
            ("trigger_price", v_num(price)),
            ("single_day_pct", v_num(single_day_pct)),
        ]),
    );
    MonitorStep::Opened(record)
}

fn resolve(record: &OvercorrectionRecord, date: NaiveDate, price: f64, cfg: &EngineConfig) -> MonitorStep {
    let reversal = record.reversal_fraction(price);
    let mut updated = record.clone();

    if reversal >= cfg.overcorrection_confirm_reversal {
        // Fully retraced: the move was noise, no score effect propagates.
        updated.status = MonitorStatus::ConfirmedOvercorrection;
        updated.resolved_date = Some(date);
        logging::info(
            Domain::Overcorrection,
            "confirmed_overcorrection",
            obj(&[("reversal", v_num(reversal))]),
        );
        return MonitorStep::Resolved { record: updated, proposal: None };
    }

    if reversal >= cfg.overcorrection_extend_reversal
        && updated.extensions < cfg.overcorrection_max_extensions
    {
        updated.extensions += 1;
        updated.resolution_date = add_trading_days(date, cfg.overcorrection_window_days);
        logging::info(
            Domain::Overcorrection,
            "monitor_extended",
            obj(&[("reversal", v_num(reversal)), ("extensions", v_num(updated.extensions as f64))]),
        );
        return MonitorStep::Extended(updated);
    }

    // Little or no reversal (or extensions exhausted): the move is accepted
    // as fundamental and the direction-aligned hypotheses earn the points.
    updated.status = MonitorStatus::FundamentalMove;
    updated.resolved_date = Some(date);
    logging::info(
        Domain::Overcorrection,
        "fundamental_move",
        obj(&[("reversal", v_num(reversal))]),
    );
    MonitorStep::Resolved {
        record: updated,
        proposal: Some(ProposedAdjustment {
            direction: record.direction,
            points: cfg.overcorrection_fundamental_points,
        }),
    }
}
