//! Technical-level evaluation over a daily close history.
//!
//! Works on the cycle snapshot's oldest-first close series rather than
//! incremental indicator state: the engine re-reads the bounded history each
//! cycle, so levels are recomputed from scratch and stay consistent with the
//! snapshot it was handed.

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;

/// Simple moving average over the last `period` closes. None until enough
/// history exists.
pub fn sma(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let window = &closes[closes.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Percent change over the last `days` sessions. None on short history.
pub fn window_return_pct(closes: &[f64], days: usize) -> Option<f64> {
    if closes.len() < days + 1 {
        return None;
    }
    let start = closes[closes.len() - 1 - days];
    let end = closes[closes.len() - 1];
    if start <= 0.0 || !start.is_finite() || !end.is_finite() {
        return None;
    }
    Some((end - start) / start * 100.0)
}

/// A technical event matched this cycle. Closed set: adding a rule means
/// adding a variant and the compiler walks every consumer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TechnicalEvent {
    SupportBreak { level: f64 },
    SupportHold { level: f64 },
    ResistanceBreak { level: f64 },
    ResistanceHold { level: f64 },
    Ma50CrossUp { ma: f64 },
    Ma50CrossDown { ma: f64 },
    /// Price stretched away from the 200-day mean; a mild mean-reversion
    /// signal against the direction of the stretch.
    Ma200Stretch { deviation_pct: f64 },
}

impl TechnicalEvent {
    /// Signed direction of the signal: +1 bullish, -1 bearish.
    pub fn direction(&self) -> f64 {
        match self {
            TechnicalEvent::SupportBreak { .. } => -1.0,
            TechnicalEvent::SupportHold { .. } => 1.0,
            TechnicalEvent::ResistanceBreak { .. } => 1.0,
            TechnicalEvent::ResistanceHold { .. } => -1.0,
            TechnicalEvent::Ma50CrossUp { .. } => 1.0,
            TechnicalEvent::Ma50CrossDown { .. } => -1.0,
            // Stretch above the mean argues down, stretch below argues up.
            TechnicalEvent::Ma200Stretch { deviation_pct } => -deviation_pct.signum(),
        }
    }

    /// Mean-reversion signals carry their own (smaller) point value.
    pub fn is_mean_reversion(&self) -> bool {
        matches!(self, TechnicalEvent::Ma200Stretch { .. })
    }

    pub fn describe(&self) -> String {
        match self {
            TechnicalEvent::SupportBreak { level } => format!("support break at {:.2}", level),
            TechnicalEvent::SupportHold { level } => format!("support held at {:.2}", level),
            TechnicalEvent::ResistanceBreak { level } => format!("resistance break at {:.2}", level),
            TechnicalEvent::ResistanceHold { level } => format!("resistance held at {:.2}", level),
            TechnicalEvent::Ma50CrossUp { ma } => format!("close crossed above 50d MA {:.2}", ma),
            TechnicalEvent::Ma50CrossDown { ma } => format!("close crossed below 50d MA {:.2}", ma),
            TechnicalEvent::Ma200Stretch { deviation_pct } => {
                format!("{:+.1}% from 200d MA, mean-reversion watch", deviation_pct)
            }
        }
    }
}

/// Local-extrema support/resistance levels from the close history.
///
/// A close is a level when it is strictly below (support) or above
/// (resistance) its two neighbours on each side; near-duplicate levels
/// within `tolerance` are merged. At most five levels per side.
pub fn find_levels(closes: &[f64], tolerance: f64) -> (Vec<f64>, Vec<f64>) {
    let mut supports = Vec::new();
    let mut resistances = Vec::new();
    if closes.len() < 5 {
        return (supports, resistances);
    }
    for i in 2..closes.len() - 2 {
        let c = closes[i];
        let is_low = c < closes[i - 1] && c < closes[i - 2] && c < closes[i + 1] && c < closes[i + 2];
        let is_high = c > closes[i - 1] && c > closes[i - 2] && c > closes[i + 1] && c > closes[i + 2];
        if is_low && !supports.iter().any(|&l: &f64| (l - c).abs() < c * tolerance) {
            supports.push(c);
        }
        if is_high && !resistances.iter().any(|&l: &f64| (l - c).abs() < c * tolerance) {
            resistances.push(c);
        }
    }
    supports.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    resistances.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    supports.truncate(5);
    resistances.truncate(5);
    (supports, resistances)
}

/// Evaluate all technical rules for one cycle.
///
/// `history` is the oldest-first close series *excluding* today;
/// `prev_close` and `price` are yesterday's and today's closes.
pub fn evaluate(
    history: &[f64],
    prev_close: f64,
    price: f64,
    cfg: &EngineConfig,
) -> Vec<TechnicalEvent> {
    let mut events = Vec::new();
    if !price.is_finite() || !prev_close.is_finite() || price <= 0.0 || prev_close <= 0.0 {
        return events;
    }

    let (supports, resistances) = find_levels(history, cfg.level_tolerance);

    // Nearest support below yesterday's close: broken if today closed under
    // it, held if today bounced off within tolerance.
    if let Some(&support) = supports
        .iter()
        .filter(|&&s| s < prev_close)
        .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
    {
        if price < support {
            events.push(TechnicalEvent::SupportBreak { level: support });
        } else if (price - support).abs() <= support * cfg.level_tolerance && price >= prev_close {
            events.push(TechnicalEvent::SupportHold { level: support });
        }
    }

    if let Some(&resistance) = resistances
        .iter()
        .filter(|&&r| r > prev_close)
        .min_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
    {
        if price > resistance {
            events.push(TechnicalEvent::ResistanceBreak { level: resistance });
        } else if (price - resistance).abs() <= resistance * cfg.level_tolerance
            && price <= prev_close
        {
            events.push(TechnicalEvent::ResistanceHold { level: resistance });
        }
    }

    // 50-day SMA crossover.
    if let Some(ma50) = sma(history, 50) {
        if prev_close <= ma50 && price > ma50 {
            events.push(TechnicalEvent::Ma50CrossUp { ma: ma50 });
        } else if prev_close >= ma50 && price < ma50 {
            events.push(TechnicalEvent::Ma50CrossDown { ma: ma50 });
        }
    }

    // 200-day stretch.
    if let Some(ma200) = sma(history, 200) {
        if ma200 > 0.0 {
            let deviation_pct = (price - ma200) / ma200 * 100.0;
            if deviation_pct.abs() > cfg.ma200_deviation_pct {
                events.push(TechnicalEvent::Ma200Stretch { deviation_pct });
            }
        }
    }

    events
}
