//! Price classifier and layered adjustment pipeline.
//!
//! Turns one day's price/volume action into per-hypothesis raw-score
//! deltas. Layers apply in a fixed order (direction, volume confirmation,
//! cumulative amplification, technical levels, external signals, the
//! overcorrection proposal, then the earnings amplifier) because later
//! layers read the cumulative total the earlier ones produced.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::calendar::within_trading_days;
use crate::config::EngineConfig;
use crate::engine::{CycleSnapshot, ExternalSignal};
use crate::evidence::{Diagnosticity, EvidenceItem, EvidenceSource, Impact};
use crate::logging::{self, obj, v_num, v_str, Domain};
use crate::narrative::{Hypothesis, Stance};
use crate::overcorrection::ProposedAdjustment;
use crate::technicals::{self, TechnicalEvent};

/// Severity tier of a daily move. Bands are contiguous and non-overlapping
/// over |pct|.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MoveBand {
    Noise,
    Notable,
    Significant,
    Material,
}

impl MoveBand {
    pub fn points(&self, cfg: &EngineConfig) -> f64 {
        match self {
            MoveBand::Noise => 0.0,
            MoveBand::Notable => cfg.notable_points,
            MoveBand::Significant => cfg.significant_points,
            MoveBand::Material => cfg.material_points,
        }
    }
}

/// Classify a daily percent change. Non-finite input is Noise.
pub fn classify(pct_change: f64, cfg: &EngineConfig) -> MoveBand {
    if !pct_change.is_finite() {
        return MoveBand::Noise;
    }
    let magnitude = pct_change.abs();
    if magnitude >= cfg.material_pct {
        MoveBand::Material
    } else if magnitude >= cfg.significant_pct {
        MoveBand::Significant
    } else if magnitude >= cfg.notable_pct {
        MoveBand::Notable
    } else {
        MoveBand::Noise
    }
}

/// Informational flags from the cumulative windows. Only the 5-day window
/// feeds back into scores; 20- and 60-day triggers are flags alone.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WindowFlags {
    pub d5_pct: Option<f64>,
    pub d5_triggered: bool,
    pub d20_pct: Option<f64>,
    pub d20_triggered: bool,
    pub d60_pct: Option<f64>,
    pub d60_triggered: bool,
}

/// Audit metadata for one cycle's classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationMeta {
    pub pct_change: f64,
    pub band: MoveBand,
    pub band_points: f64,
    pub mandatory_review: bool,
    pub volume_ratio: f64,
    pub volume_multiplier: f64,
    pub windows: WindowFlags,
    pub earnings_mode: bool,
    pub technical_events: Vec<TechnicalEvent>,
}

/// Pipeline result: deltas into the raw-score accumulator plus audit trail.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub deltas: HashMap<String, f64>,
    pub meta: ClassificationMeta,
    pub generated_evidence: Vec<EvidenceItem>,
}

/// Run every adjustment layer for one cycle.
pub fn run(
    hypotheses: &[Hypothesis],
    snapshot: &CycleSnapshot,
    proposal: Option<ProposedAdjustment>,
    cfg: &EngineConfig,
) -> PipelineOutput {
    let pct_change = daily_change_pct(snapshot.current_price, snapshot.previous_close);
    let band = classify(pct_change, cfg);
    let move_sign = if pct_change >= 0.0 { 1.0 } else { -1.0 };

    let volume_ratio = volume_ratio(snapshot.volume, snapshot.avg_20day_volume);
    let volume_multiplier = cfg.volume_multiplier(volume_ratio);

    let earnings_mode = snapshot
        .earnings
        .as_ref()
        .map(|e| within_trading_days(snapshot.date, e.date, cfg.earnings_window_days))
        .unwrap_or(false);

    let mut deltas: HashMap<String, f64> =
        hypotheses.iter().map(|h| (h.id.clone(), 0.0)).collect();
    let mut evidence = Vec::new();

    // --- Directional adjustment (normal mode only; earnings mode is
    // evaluated on its own scale below) ---
    let mut directional: HashMap<String, f64> = HashMap::new();
    if !earnings_mode && band != MoveBand::Noise {
        let points = band.points(cfg);
        for h in hypotheses {
            let delta = match h.stance {
                Stance::Neutral => {
                    // A material move argues against a range-bound thesis.
                    if band == MoveBand::Material {
                        -points / 2.0
                    } else {
                        0.0
                    }
                }
                _ if h.stance.aligned_with(move_sign) => points,
                _ => -points,
            };
            if delta != 0.0 {
                directional.insert(h.id.clone(), delta * volume_multiplier);
            }
        }
    }

    // --- Cumulative windows: 5-day amplifies, 20/60 flag only ---
    let mut series = snapshot.price_history.clone();
    series.push(snapshot.current_price);
    let d5 = technicals::window_return_pct(&series, 5);
    let d20 = technicals::window_return_pct(&series, 20);
    let d60 = technicals::window_return_pct(&series, 60);
    let windows = WindowFlags {
        d5_pct: d5,
        d5_triggered: d5.map(|p| p.abs() >= cfg.cumulative_5d_pct).unwrap_or(false),
        d20_pct: d20,
        d20_triggered: d20.map(|p| p.abs() >= cfg.cumulative_20d_pct).unwrap_or(false),
        d60_pct: d60,
        d60_triggered: d60.map(|p| p.abs() >= cfg.cumulative_60d_pct).unwrap_or(false),
    };
    let amplifier = if windows.d5_triggered { 1.0 + cfg.cumulative_5d_amplifier } else { 1.0 };
    for (id, delta) in &directional {
        *deltas.entry(id.clone()).or_insert(0.0) += delta * amplifier;
    }

    // --- Technical levels (feature-flagged) ---
    let mut technical_events = Vec::new();
    if cfg.technicals_enabled {
        technical_events = technicals::evaluate(
            &snapshot.price_history,
            snapshot.previous_close,
            snapshot.current_price,
            cfg,
        );
        for event in &technical_events {
            let base = if event.is_mean_reversion() {
                cfg.mean_reversion_points
            } else {
                cfg.technical_points
            };
            let signal_dir = event.direction();
            for h in hypotheses {
                let stance_dir = h.stance.direction();
                if stance_dir == 0.0 {
                    continue;
                }
                let delta = base * signal_dir * stance_dir * volume_multiplier;
                *deltas.entry(h.id.clone()).or_insert(0.0) += delta;
            }
            evidence.push(technical_evidence(event, hypotheses, snapshot));
        }
    }

    // --- External signals (feature-flagged) ---
    if cfg.external_signals_enabled {
        for signal in &snapshot.external_signals {
            apply_external(signal, hypotheses, &mut deltas, cfg);
        }
    } else if !snapshot.external_signals.is_empty() {
        logging::debug(
            Domain::Pipeline,
            "external_signals_disabled",
            obj(&[("count", v_num(snapshot.external_signals.len() as f64))]),
        );
    }

    // --- Overcorrection proposal ---
    if let Some(p) = proposal {
        for h in hypotheses {
            if h.stance.aligned_with(p.direction.sign()) {
                *deltas.entry(h.id.clone()).or_insert(0.0) += p.points;
            }
        }
        evidence.push(overcorrection_evidence(&p, hypotheses, snapshot));
    }

    // --- Earnings amplifier: its own scale, not the band scale ---
    if earnings_mode {
        if pct_change.abs() >= cfg.earnings_ignore_pct {
            for h in hypotheses {
                let delta = if h.stance.aligned_with(move_sign) {
                    cfg.earnings_points
                } else if h.stance.direction() != 0.0 {
                    -cfg.earnings_points
                } else {
                    0.0
                };
                *deltas.entry(h.id.clone()).or_insert(0.0) += delta;
            }
            logging::info(
                Domain::Pipeline,
                "earnings_amplifier",
                obj(&[("pct_change", v_num(pct_change))]),
            );
        } else {
            logging::debug(
                Domain::Pipeline,
                "earnings_window_moderate_move_ignored",
                obj(&[("pct_change", v_num(pct_change))]),
            );
        }
    }

    // --- Price-signal evidence for significant and material moves ---
    if !earnings_mode && band >= MoveBand::Significant {
        evidence.push(price_evidence(band, pct_change, move_sign, hypotheses, snapshot));
    }

    let meta = ClassificationMeta {
        pct_change,
        band,
        band_points: band.points(cfg),
        mandatory_review: band == MoveBand::Material,
        volume_ratio,
        volume_multiplier,
        windows,
        earnings_mode,
        technical_events,
    };

    PipelineOutput { deltas, meta, generated_evidence: evidence }
}

fn daily_change_pct(price: f64, prev_close: f64) -> f64 {
    if !price.is_finite() || !prev_close.is_finite() || prev_close <= 0.0 {
        logging::warn(
            Domain::Pipeline,
            "bad_price_input",
            obj(&[("price", v_num(price)), ("prev_close", v_num(prev_close))]),
        );
        return 0.0;
    }
    (price - prev_close) / prev_close * 100.0
}

fn volume_ratio(volume: f64, avg_20day: f64) -> f64 {
    if !volume.is_finite() || !avg_20day.is_finite() || avg_20day <= 0.0 {
        return 1.0;
    }
    volume / avg_20day
}

fn apply_external(
    signal: &ExternalSignal,
    hypotheses: &[Hypothesis],
    deltas: &mut HashMap<String, f64>,
    cfg: &EngineConfig,
) {
    let cap = cfg.external_signal_max_points;
    match signal {
        ExternalSignal::Sentiment { value, confidence } => {
            if !value.is_finite() || !confidence.is_finite() {
                logging::warn(Domain::Pipeline, "non_numeric_external_signal", obj(&[]));
                return;
            }
            let conf = confidence.clamp(0.0, 1.0);
            for h in hypotheses {
                let delta =
                    (value * cap * conf * h.stance.direction()).clamp(-cap, cap);
                *deltas.entry(h.id.clone()).or_insert(0.0) += delta;
            }
        }
        ExternalSignal::PerHypothesis { values, confidence } => {
            let conf = confidence.clamp(0.0, 1.0);
            for (id, value) in values {
                if !value.is_finite() {
                    continue;
                }
                match deltas.get_mut(id) {
                    Some(d) => *d += (value * conf).clamp(-cap, cap),
                    None => logging::warn(
                        Domain::Pipeline,
                        "external_signal_unknown_hypothesis",
                        obj(&[("id", v_str(id))]),
                    ),
                }
            }
        }
    }
}

fn impacts_by_alignment(hypotheses: &[Hypothesis], signal_dir: f64) -> HashMap<String, Impact> {
    hypotheses
        .iter()
        .filter(|h| h.stance.direction() != 0.0)
        .map(|h| {
            let impact = if h.stance.aligned_with(signal_dir) {
                Impact::Consistent
            } else {
                Impact::Inconsistent
            };
            (h.id.clone(), impact)
        })
        .collect()
}

fn price_evidence(
    band: MoveBand,
    pct_change: f64,
    move_sign: f64,
    hypotheses: &[Hypothesis],
    snapshot: &CycleSnapshot,
) -> EvidenceItem {
    let diagnosticity = if band == MoveBand::Material {
        Diagnosticity::High
    } else {
        Diagnosticity::Medium
    };
    EvidenceItem {
        id: format!("px-{}-{:?}", snapshot.date, band).to_lowercase(),
        date: snapshot.date,
        diagnosticity,
        impacts: impacts_by_alignment(hypotheses, move_sign),
        decay: None,
        active: true,
        source: EvidenceSource::PriceSignal,
        note: format!("{:+.1}% daily move", pct_change),
    }
}

fn technical_evidence(
    event: &TechnicalEvent,
    hypotheses: &[Hypothesis],
    snapshot: &CycleSnapshot,
) -> EvidenceItem {
    let diagnosticity = if event.is_mean_reversion() {
        Diagnosticity::Low
    } else {
        Diagnosticity::Medium
    };
    EvidenceItem {
        id: format!("tech-{}-{}", snapshot.date, event.describe().replace(' ', "-")),
        date: snapshot.date,
        diagnosticity,
        impacts: impacts_by_alignment(hypotheses, event.direction()),
        decay: None,
        active: true,
        source: EvidenceSource::TechnicalSignal,
        note: event.describe(),
    }
}

fn overcorrection_evidence(
    proposal: &ProposedAdjustment,
    hypotheses: &[Hypothesis],
    snapshot: &CycleSnapshot,
) -> EvidenceItem {
    EvidenceItem {
        id: format!("oc-{}", snapshot.date),
        date: snapshot.date,
        diagnosticity: Diagnosticity::High,
        impacts: impacts_by_alignment(hypotheses, proposal.direction.sign()),
        decay: None,
        active: true,
        source: EvidenceSource::OvercorrectionSignal,
        note: "dislocation resolved as fundamental move".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EarningsContext;
    use chrono::NaiveDate;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn hyps() -> Vec<Hypothesis> {
        vec![
            Hypothesis::new("T1", "re-rating", Stance::Bullish, 60.0, d("2025-01-01")),
            Hypothesis::new("T2", "slow fade", Stance::Bearish, 25.0, d("2025-01-01")),
            Hypothesis::new("T3", "range-bound", Stance::Neutral, 10.0, d("2025-01-01")),
        ]
    }

    fn snapshot(price: f64, prev: f64, volume_ratio: f64) -> CycleSnapshot {
        CycleSnapshot {
            date: d("2025-06-02"),
            current_price: price,
            previous_close: prev,
            volume: 1_000_000.0 * volume_ratio,
            avg_20day_volume: 1_000_000.0,
            cumulative_5day_return: 0.0,
            earnings: None,
            price_history: vec![prev; 10],
            external_signals: Vec::new(),
            immediate_flip_trigger: None,
        }
    }

    #[test]
    fn test_classify_bands_contiguous() {
        let cfg = EngineConfig::default();
        assert_eq!(classify(1.9, &cfg), MoveBand::Noise);
        assert_eq!(classify(2.0, &cfg), MoveBand::Notable);
        assert_eq!(classify(-4.9, &cfg), MoveBand::Notable);
        assert_eq!(classify(5.0, &cfg), MoveBand::Significant);
        assert_eq!(classify(-9.9, &cfg), MoveBand::Significant);
        assert_eq!(classify(10.0, &cfg), MoveBand::Material);
        assert_eq!(classify(f64::NAN, &cfg), MoveBand::Noise);
    }

    #[test]
    fn test_classify_monotonic_in_magnitude() {
        let cfg = EngineConfig::default();
        let mut prev = classify(0.0, &cfg);
        for i in 0..140 {
            let band = classify(i as f64 / 10.0, &cfg);
            assert!(band >= prev, "band regressed at {:.1}%", i as f64 / 10.0);
            prev = band;
        }
    }

    #[test]
    fn test_significant_down_move_with_high_volume() {
        // -7.5% on 2.1x volume: Significant; bearish up, bullish down,
        // both scaled by the high-volume multiplier.
        let cfg = EngineConfig::default();
        let snap = snapshot(92.5, 100.0, 2.1);
        let out = run(&hyps(), &snap, None, &cfg);
        assert_eq!(out.meta.band, MoveBand::Significant);
        assert_eq!(out.meta.volume_multiplier, 1.25);
        let expected = cfg.significant_points * 1.25;
        assert_eq!(out.deltas["T1"], -expected);
        assert_eq!(out.deltas["T2"], expected);
        assert_eq!(out.deltas["T3"], 0.0);
        assert!(!out.meta.mandatory_review);
    }

    #[test]
    fn test_material_move_flags_review_and_taxes_neutral() {
        let cfg = EngineConfig::default();
        let mut snap = snapshot(111.0, 100.0, 1.0);
        snap.price_history = vec![100.0, 100.0]; // too short for window triggers
        let out = run(&hyps(), &snap, None, &cfg);
        assert_eq!(out.meta.band, MoveBand::Material);
        assert!(out.meta.mandatory_review);
        assert_eq!(out.deltas["T1"], cfg.material_points);
        assert_eq!(out.deltas["T3"], -cfg.material_points / 2.0);
        // Material move also generates a price evidence item.
        assert!(out
            .generated_evidence
            .iter()
            .any(|e| e.source == EvidenceSource::PriceSignal));
    }

    #[test]
    fn test_noise_move_touches_nothing() {
        let cfg = EngineConfig::default();
        let snap = snapshot(100.5, 100.0, 1.0);
        let out = run(&hyps(), &snap, None, &cfg);
        assert!(out.deltas.values().all(|d| *d == 0.0));
        assert!(out.generated_evidence.is_empty());
    }

    #[test]
    fn test_five_day_trigger_amplifies_directional() {
        let mut cfg = EngineConfig::default();
        cfg.technicals_enabled = false;
        // History falling 2%/day so the 5-day cumulative move trips.
        let mut snap = snapshot(88.0, 94.0, 1.0);
        snap.price_history = vec![100.0, 98.0, 96.0, 95.0, 94.5, 94.0];
        let out = run(&hyps(), &snap, None, &cfg);
        assert!(out.meta.windows.d5_triggered);
        // -6.38% daily: Significant. Bearish delta = points * (1 + amp).
        let expected = cfg.significant_points * (1.0 + cfg.cumulative_5d_amplifier);
        assert!((out.deltas["T2"] - expected).abs() < 1e-9);
    }

    #[test]
    fn test_long_window_triggers_flag_only() {
        let mut cfg = EngineConfig::default();
        cfg.technicals_enabled = false;
        // 25 sessions of slow drift: 20-day window trips, 5-day does not.
        let mut snap = snapshot(80.0, 80.4, 1.0);
        snap.price_history = (0..25).map(|i| 100.0 - i as f64 * 0.8).collect();
        let out = run(&hyps(), &snap, None, &cfg);
        assert!(out.meta.windows.d20_triggered);
        assert!(!out.meta.windows.d5_triggered);
        // Daily move is Noise, so the flags changed no scores.
        assert!(out.deltas.values().all(|d| *d == 0.0));
    }

    #[test]
    fn test_insufficient_history_skips_windows() {
        let mut cfg = EngineConfig::default();
        cfg.technicals_enabled = false;
        let mut snap = snapshot(100.0, 100.0, 1.0);
        snap.price_history = vec![100.0, 100.0];
        let out = run(&hyps(), &snap, None, &cfg);
        assert_eq!(out.meta.windows.d5_pct, None);
        assert!(!out.meta.windows.d5_triggered);
    }

    #[test]
    fn test_technical_events_emit_evidence() {
        let mut cfg = EngineConfig::default();
        cfg.technicals_enabled = true;
        let mut snap = snapshot(101.0, 99.5, 1.0);
        snap.price_history = vec![100.0; 60];
        let out = run(&hyps(), &snap, None, &cfg);
        assert!(out
            .meta
            .technical_events
            .iter()
            .any(|e| matches!(e, TechnicalEvent::Ma50CrossUp { .. })));
        assert!(out
            .generated_evidence
            .iter()
            .any(|e| e.source == EvidenceSource::TechnicalSignal));
        // Bullish cross: T1 gains, T2 loses.
        assert!(out.deltas["T1"] > 0.0);
        assert!(out.deltas["T2"] < 0.0);
    }

    #[test]
    fn test_external_sentiment_clamped() {
        let mut cfg = EngineConfig::default();
        cfg.technicals_enabled = false;
        cfg.external_signals_enabled = true;
        let mut snap = snapshot(100.0, 100.0, 1.0);
        snap.external_signals = vec![ExternalSignal::Sentiment { value: 5.0, confidence: 1.0 }];
        let out = run(&hyps(), &snap, None, &cfg);
        assert_eq!(out.deltas["T1"], cfg.external_signal_max_points);
        assert_eq!(out.deltas["T2"], -cfg.external_signal_max_points);
    }

    #[test]
    fn test_external_signals_ignored_when_disabled() {
        let mut cfg = EngineConfig::default();
        cfg.technicals_enabled = false;
        cfg.external_signals_enabled = false;
        let mut snap = snapshot(100.0, 100.0, 1.0);
        snap.external_signals = vec![ExternalSignal::Sentiment { value: 1.0, confidence: 1.0 }];
        let out = run(&hyps(), &snap, None, &cfg);
        assert!(out.deltas.values().all(|d| *d == 0.0));
    }

    #[test]
    fn test_overcorrection_proposal_applied_to_aligned() {
        use crate::overcorrection::MoveDirection;
        let mut cfg = EngineConfig::default();
        cfg.technicals_enabled = false;
        let snap = snapshot(100.0, 100.0, 1.0);
        let proposal = ProposedAdjustment { direction: MoveDirection::Down, points: 8.0 };
        let out = run(&hyps(), &snap, Some(proposal), &cfg);
        assert_eq!(out.deltas["T2"], 8.0); // bearish aligned with down
        assert_eq!(out.deltas["T1"], 0.0);
        assert!(out
            .generated_evidence
            .iter()
            .any(|e| e.source == EvidenceSource::OvercorrectionSignal));
    }

    #[test]
    fn test_earnings_window_ignores_moderate_move() {
        let mut cfg = EngineConfig::default();
        cfg.technicals_enabled = false;
        let mut snap = snapshot(103.0, 100.0, 1.0);
        snap.earnings = Some(EarningsContext { date: d("2025-06-03"), surprise_pct: Some(1.0) });
        let out = run(&hyps(), &snap, None, &cfg);
        assert!(out.meta.earnings_mode);
        // +3% is Notable normally, but moderate inside the earnings window.
        assert!(out.deltas.values().all(|d| *d == 0.0));
    }

    #[test]
    fn test_earnings_window_amplifies_big_move() {
        let mut cfg = EngineConfig::default();
        cfg.technicals_enabled = false;
        let mut snap = snapshot(92.0, 100.0, 1.0);
        snap.earnings = Some(EarningsContext { date: d("2025-06-02"), surprise_pct: Some(-6.0) });
        let out = run(&hyps(), &snap, None, &cfg);
        assert_eq!(out.deltas["T2"], cfg.earnings_points);
        assert_eq!(out.deltas["T1"], -cfg.earnings_points);
        // Earnings scale is independent of band points.
        assert_ne!(out.deltas["T2"].abs(), cfg.significant_points);
    }

    #[test]
    fn test_bad_inputs_are_neutral() {
        let cfg = EngineConfig::default();
        let snap = snapshot(f64::NAN, 0.0, f64::NAN);
        let out = run(&hyps(), &snap, None, &cfg);
        assert_eq!(out.meta.band, MoveBand::Noise);
        assert_eq!(out.meta.volume_multiplier, 1.0);
        assert!(out.deltas.values().all(|d| d.is_finite()));
    }
}
