//! Correlation weighting, the confirmatory layer.
//!
//! Cross-checks evidence-implied dominance against price-implied dominance.
//! Runs after normalization but writes nothing back into scores; its top
//! narrative may legitimately disagree with the tracker's dominant, and that
//! disagreement is itself a signal.

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::logging::{self, obj, v_num, v_str, Domain};
use crate::narrative::Hypothesis;

/// Pearson correlation between two equal-length series. Zero-variance
/// inputs correlate at 0.0 rather than NaN.
pub fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return 0.0;
    }
    let xs = &xs[xs.len() - n..];
    let ys = &ys[ys.len() - n..];
    let mean_x = xs.iter().sum::<f64>() / n as f64;
    let mean_y = ys.iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for i in 0..n {
        let dx = xs[i] - mean_x;
        let dy = ys[i] - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x <= 0.0 || var_y <= 0.0 {
        return 0.0;
    }
    let r = cov / (var_x.sqrt() * var_y.sqrt());
    if r.is_finite() {
        r.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Per-window correlation for one hypothesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowCorrelation {
    pub window: usize,
    pub correlation: f64,
}

/// One hypothesis's row in the correlation report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypothesisCorrelation {
    pub id: String,
    pub windows: Vec<WindowCorrelation>,
    /// Weighted mean of the window correlations, best-|correlation|
    /// window counted double.
    pub composite: f64,
    pub price_implied_weight: f64,
    pub evidence_implied_weight: f64,
    pub dislocation_bps: f64,
    pub material_dislocation: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationReport {
    pub rows: Vec<HypothesisCorrelation>,
    pub top_id: String,
    pub previous_top_id: Option<String>,
    /// Top narrative changed since the previous cycle.
    pub inflection: bool,
}

/// Daily simple returns from an oldest-first close series.
pub fn daily_returns(closes: &[f64]) -> Vec<f64> {
    let mut returns = Vec::new();
    for pair in closes.windows(2) {
        if pair[0] > 0.0 && pair[0].is_finite() && pair[1].is_finite() {
            returns.push((pair[1] - pair[0]) / pair[0]);
        }
    }
    returns
}

/// Build the correlation report for one cycle.
///
/// `closes` is the oldest-first close series including today. Returns None
/// when the hypothesis set is degenerate (<2) or history is too short for
/// the smallest configured window.
pub fn evaluate(
    hypotheses: &[Hypothesis],
    closes: &[f64],
    previous_top_id: Option<&str>,
    cfg: &EngineConfig,
) -> Option<CorrelationReport> {
    if hypotheses.len() < 2 {
        logging::debug(Domain::Correlation, "degenerate_hypothesis_set", obj(&[]));
        return None;
    }
    let returns = daily_returns(closes);
    let min_window = cfg.correlation_windows.iter().copied().min().unwrap_or(5);
    if returns.len() < min_window {
        logging::debug(
            Domain::Correlation,
            "insufficient_history",
            obj(&[("returns", v_num(returns.len() as f64))]),
        );
        return None;
    }

    let mut rows: Vec<HypothesisCorrelation> = hypotheses
        .iter()
        .map(|h| {
            let scale = h.stance.direction() * (h.survival_score / 100.0);
            let implied: Vec<f64> = returns.iter().map(|r| scale * r.abs()).collect();
            let windows: Vec<WindowCorrelation> = cfg
                .correlation_windows
                .iter()
                .filter(|&&w| returns.len() >= w)
                .map(|&w| {
                    let tail_i = &implied[implied.len() - w..];
                    let tail_r = &returns[returns.len() - w..];
                    WindowCorrelation { window: w, correlation: pearson(tail_i, tail_r) }
                })
                .collect();
            let composite = composite_of(&windows);
            HypothesisCorrelation {
                id: h.id.clone(),
                windows,
                composite,
                price_implied_weight: 0.0,
                evidence_implied_weight: h.survival_score / 100.0,
                dislocation_bps: 0.0,
                material_dislocation: false,
            }
        })
        .collect();

    // Price-implied weights: shift composites from [-1, 1] into [0, 2]
    // and normalize so they sum to one, mirroring the survival simplex.
    let shifted: Vec<f64> = rows.iter().map(|r| r.composite + 1.0).collect();
    let total: f64 = shifted.iter().sum();
    for (row, s) in rows.iter_mut().zip(&shifted) {
        row.price_implied_weight = if total > 0.0 { s / total } else { 1.0 / rows_len(&shifted) };
        row.dislocation_bps =
            (row.price_implied_weight - row.evidence_implied_weight) * 10_000.0;
        row.material_dislocation = row.dislocation_bps.abs() > cfg.dislocation_material_bps;
        if row.material_dislocation {
            logging::info(
                Domain::Correlation,
                "material_dislocation",
                obj(&[("id", v_str(&row.id)), ("bps", v_num(row.dislocation_bps))]),
            );
        }
    }

    let top_id = rows
        .iter()
        .max_by(|a, b| {
            a.composite
                .partial_cmp(&b.composite)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|r| r.id.clone())?;
    let inflection = previous_top_id.map(|p| p != top_id).unwrap_or(false);
    if inflection {
        logging::info(
            Domain::Correlation,
            "top_narrative_inflection",
            obj(&[
                ("from", v_str(previous_top_id.unwrap_or(""))),
                ("to", v_str(&top_id)),
            ]),
        );
    }

    Some(CorrelationReport {
        rows,
        top_id,
        previous_top_id: previous_top_id.map(str::to_string),
        inflection,
    })
}

fn rows_len(shifted: &[f64]) -> f64 {
    if shifted.is_empty() {
        1.0
    } else {
        shifted.len() as f64
    }
}

fn composite_of(windows: &[WindowCorrelation]) -> f64 {
    if windows.is_empty() {
        return 0.0;
    }
    let best = windows
        .iter()
        .map(|w| w.correlation.abs())
        .fold(f64::MIN, f64::max);
    let mut weighted = 0.0;
    let mut weight_sum = 0.0;
    let mut doubled = false;
    for w in windows {
        // First window tied for best |correlation| counts double.
        let weight = if !doubled && w.correlation.abs() == best {
            doubled = true;
            2.0
        } else {
            1.0
        };
        weighted += w.correlation * weight;
        weight_sum += weight;
    }
    weighted / weight_sum
}
