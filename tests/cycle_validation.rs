//! End-to-end cycle validation.
//!
//! Drives full engine cycles against synthetic market data and checks the
//! published invariants hold through every layer.
//!
//! Test categories:
//!   1. Reference scoring       -- [60,25,10,5] passes through untouched
//!   2. Normalization invariant -- sum 100, every score in [5, 80]
//!   3. Move classification     -- -7.5% on 2.1x volume worked example
//!   4. Overcorrection lifecycle -- confirm and fundamental branches
//!   5. Flip bookkeeping        -- dominance never moves without a record
//!   6. Idempotent re-run       -- same cycle twice applies once
//!   7. Editorial override      -- pins display, never the computed state
//!   8. Evidence decay          -- editorial items shift and expire

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use std::collections::HashMap;

use narrativefx::calendar::add_trading_days;
use narrativefx::config::EngineConfig;
use narrativefx::engine::{CycleSnapshot, Engine};
use narrativefx::evidence::{Diagnosticity, EvidenceItem, EvidenceSource, Impact};
use narrativefx::narrative::{EditorialOverride, Hypothesis, NarrativeState, Stance};
use narrativefx::overcorrection::{MonitorStatus, MoveDirection};
use narrativefx::pipeline::MoveBand;
use narrativefx::state::InstrumentState;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Four competing theses with recent timestamps so staleness stays out of
/// the picture unless a test wants it.
fn standard_state() -> InstrumentState {
    let mut hypotheses = vec![
        Hypothesis::new("T1", "multiple re-rates", Stance::Bullish, 60.0, d("2025-01-02")),
        Hypothesis::new("T2", "margin compression", Stance::Bearish, 25.0, d("2025-01-03")),
        Hypothesis::new("T3", "demand rolls over", Stance::Bearish, 10.0, d("2025-01-06")),
        Hypothesis::new("T4", "range-bound drift", Stance::Neutral, 5.0, d("2025-01-07")),
    ];
    for h in &mut hypotheses {
        h.last_updated = d("2025-05-30");
    }
    InstrumentState::new("ACME", hypotheses)
}

fn snapshot(date: NaiveDate, price: f64, prev_close: f64, volume_ratio: f64) -> CycleSnapshot {
    CycleSnapshot {
        date,
        current_price: price,
        previous_close: prev_close,
        volume: 1_000_000.0 * volume_ratio,
        avg_20day_volume: 1_000_000.0,
        cumulative_5day_return: 0.0,
        earnings: None,
        price_history: vec![prev_close; 30],
        external_signals: Vec::new(),
        immediate_flip_trigger: None,
    }
}

// ---------------------------------------------------------------------------
// 1. Reference scoring
// ---------------------------------------------------------------------------

#[test]
fn reference_vector_survives_flat_cycle_unchanged() {
    let mut state = standard_state();
    let engine = Engine::new(EngineConfig::default());
    let outcome = engine.run_cycle(&mut state, &snapshot(d("2025-06-02"), 100.0, 100.0, 1.0), now());
    let scores: Vec<f64> = outcome.hypotheses.iter().map(|h| h.survival_score).collect();
    assert_eq!(scores, vec![60.0, 25.0, 10.0, 5.0]);
    let update = outcome.narrative.unwrap();
    assert_eq!(update.dominant_id, "T1");
    assert_eq!(update.state, NarrativeState::Normal);
    assert!(state.hypotheses[0].dominant);
}

// ---------------------------------------------------------------------------
// 2. Normalization invariant
// ---------------------------------------------------------------------------

#[test]
fn scores_stay_on_bounded_simplex_through_shocks() {
    let mut state = standard_state();
    let engine = Engine::new(EngineConfig::default());
    let moves = [-12.0, 3.0, -6.5, 11.0, -2.0, 0.4, -9.0, 5.5];
    let mut date = d("2025-06-02");
    let mut price = 100.0;
    for pct in moves {
        let prev = price;
        price *= 1.0 + pct / 100.0;
        let outcome = engine.run_cycle(&mut state, &snapshot(date, price, prev, 1.3), now());
        let sum: f64 = outcome.hypotheses.iter().map(|h| h.survival_score).sum();
        assert!((sum - 100.0).abs() < 1e-9, "sum drifted to {} on {}", sum, date);
        for h in &outcome.hypotheses {
            assert!(
                (5.0..=80.0).contains(&h.survival_score),
                "{} out of band at {}",
                h.id,
                h.survival_score
            );
            assert!(h.survival_score.is_finite());
        }
        date = add_trading_days(date, 1);
    }
}

// ---------------------------------------------------------------------------
// 3. Move classification
// ---------------------------------------------------------------------------

#[test]
fn significant_down_move_on_heavy_volume_redistributes() {
    let mut state = standard_state();
    let engine = Engine::new(EngineConfig::default());
    let outcome = engine.run_cycle(&mut state, &snapshot(d("2025-06-02"), 92.5, 100.0, 2.1), now());
    assert_eq!(outcome.meta.band, MoveBand::Significant);
    assert!(!outcome.meta.mandatory_review);
    assert_eq!(outcome.meta.volume_multiplier, 1.25);
    // Upside-aligned T1 loses ground, downside-aligned T2 gains.
    let by_id: HashMap<&str, f64> =
        outcome.hypotheses.iter().map(|h| (h.id.as_str(), h.survival_score)).collect();
    assert!(by_id["T1"] < 60.0);
    assert!(by_id["T2"] > 25.0);
    // The move itself lands in the audit ledger.
    assert!(state.evidence.iter().any(|e| e.source == EvidenceSource::PriceSignal));
}

#[test]
fn material_move_sets_mandatory_review() {
    let mut state = standard_state();
    let engine = Engine::new(EngineConfig::default());
    let outcome = engine.run_cycle(&mut state, &snapshot(d("2025-06-02"), 110.5, 100.0, 1.0), now());
    assert_eq!(outcome.meta.band, MoveBand::Material);
    assert!(outcome.meta.mandatory_review);
}

// ---------------------------------------------------------------------------
// 4. Overcorrection lifecycle
// ---------------------------------------------------------------------------

#[test]
fn eleven_percent_drop_opens_monitor_skipping_weekends() {
    let mut state = standard_state();
    let engine = Engine::new(EngineConfig::default());
    // Friday plunge.
    engine.run_cycle(&mut state, &snapshot(d("2025-06-06"), 89.0, 100.0, 1.8), now());
    let record = state.overcorrection.clone().unwrap();
    assert_eq!(record.status, MonitorStatus::Monitoring);
    assert_eq!(record.direction, MoveDirection::Down);
    assert!(record.resolution_date > record.trigger_date);
    assert_eq!(record.resolution_date, d("2025-06-13"));
    assert_ne!(record.resolution_date.weekday(), Weekday::Sat);
    assert_ne!(record.resolution_date.weekday(), Weekday::Sun);

    // Checking before the resolution date changes nothing.
    engine.run_cycle(&mut state, &snapshot(d("2025-06-09"), 89.4, 89.0, 1.0), now());
    let held = state.overcorrection.clone().unwrap();
    assert_eq!(held.status, MonitorStatus::Monitoring);
    assert_eq!(held.trigger_date, record.trigger_date);
}

#[test]
fn recovered_price_confirms_overcorrection_without_penalty() {
    let mut state = standard_state();
    let engine = Engine::new(EngineConfig::default());
    engine.run_cycle(&mut state, &snapshot(d("2025-06-06"), 89.0, 100.0, 1.8), now());
    // By the resolution date price has clawed back well past half the gap.
    engine.run_cycle(&mut state, &snapshot(d("2025-06-13"), 96.0, 95.5, 1.0), now());
    let record = state.overcorrection.clone().unwrap();
    assert_eq!(record.status, MonitorStatus::ConfirmedOvercorrection);
    // Transient noise: no overcorrection evidence enters the ledger.
    assert!(!state
        .evidence
        .iter()
        .any(|e| e.source == EvidenceSource::OvercorrectionSignal));
}

#[test]
fn stalled_price_resolves_fundamental_and_boosts_bears() {
    let mut state = standard_state();
    let engine = Engine::new(EngineConfig::default());
    engine.run_cycle(&mut state, &snapshot(d("2025-06-06"), 89.0, 100.0, 1.8), now());
    let bear_before = state.hypothesis("T2").unwrap().survival_score;
    // Barely moved by the resolution date: the drop was real.
    engine.run_cycle(&mut state, &snapshot(d("2025-06-13"), 89.3, 89.1, 1.0), now());
    let record = state.overcorrection.clone().unwrap();
    assert_eq!(record.status, MonitorStatus::FundamentalMove);
    assert!(state
        .evidence
        .iter()
        .any(|e| e.source == EvidenceSource::OvercorrectionSignal));
    assert!(state.hypothesis("T2").unwrap().survival_score > bear_before);
}

// ---------------------------------------------------------------------------
// 5. Flip bookkeeping
// ---------------------------------------------------------------------------

#[test]
fn dominance_only_moves_with_a_matching_flip_record() {
    let mut hypotheses = vec![
        Hypothesis::new("T1", "multiple re-rates", Stance::Bullish, 60.0, d("2025-01-02")),
        Hypothesis::new("T2", "margin compression", Stance::Bearish, 30.0, d("2025-01-03")),
        Hypothesis::new("T3", "range-bound drift", Stance::Neutral, 10.0, d("2025-01-06")),
    ];
    for h in &mut hypotheses {
        h.last_updated = d("2025-05-30");
    }
    let mut state = InstrumentState::new("ACME", hypotheses);
    let engine = Engine::new(EngineConfig::default());
    let moves = [-7.0; 16];
    let mut date = d("2025-06-02");
    let mut price = 100.0;
    let mut previous_dominant: Option<String> = None;
    let mut changes = 0;
    for pct in moves {
        let prev = price;
        price *= 1.0 + pct / 100.0;
        let outcome = engine.run_cycle(&mut state, &snapshot(date, price, prev, 1.0), now());
        let update = outcome.narrative.unwrap();
        if let Some(prev_dom) = &previous_dominant {
            if update.dominant_id != *prev_dom {
                changes += 1;
                let flip = update.flip.expect("dominance moved without a flip record");
                assert_eq!(&flip.from_id, prev_dom);
                assert_eq!(flip.to_id, update.dominant_id);
                assert_eq!(flip.date, date);
            } else {
                assert!(update.flip.is_none());
            }
        }
        previous_dominant = Some(update.dominant_id);
        date = add_trading_days(date, 1);
    }
    assert!(changes >= 1, "sustained bearish grind never flipped the narrative");
    assert_eq!(state.flips.len(), changes, "flip history out of step");
}

// ---------------------------------------------------------------------------
// 6. Idempotent re-run
// ---------------------------------------------------------------------------

#[test]
fn replaying_an_applied_cycle_changes_nothing() {
    let mut state = standard_state();
    let engine = Engine::new(EngineConfig::default());
    let snap = snapshot(d("2025-06-02"), 94.0, 100.0, 1.6);
    engine.run_cycle(&mut state, &snap, now());
    let scores: Vec<f64> = state.hypotheses.iter().map(|h| h.survival_score).collect();
    let evidence_count = state.evidence.len();
    let flips = state.flips.len();

    engine.run_cycle(&mut state, &snap, now());
    let rerun: Vec<f64> = state.hypotheses.iter().map(|h| h.survival_score).collect();
    assert_eq!(rerun, scores);
    assert_eq!(state.evidence.len(), evidence_count);
    assert_eq!(state.flips.len(), flips);
    assert_eq!(state.last_cycle_date, Some(d("2025-06-02")));
}

// ---------------------------------------------------------------------------
// 7. Editorial override
// ---------------------------------------------------------------------------

#[test]
fn live_override_pins_display_but_not_computation() {
    let mut state = standard_state();
    state.set_override(EditorialOverride {
        pinned_hypothesis_id: "T2".to_string(),
        reason: "desk review pending".to_string(),
        expires_at: Utc::now() + chrono::Duration::days(1),
    });
    let engine = Engine::new(EngineConfig::default());
    let outcome = engine.run_cycle(&mut state, &snapshot(d("2025-06-02"), 100.0, 100.0, 1.0), now());
    let update = outcome.narrative.unwrap();
    assert_eq!(update.state, NarrativeState::Override);
    assert_eq!(update.displayed_dominant_id, "T2");
    assert_eq!(update.dominant_id, "T1");
    assert!(update.flip.is_none());
}

#[test]
fn cleared_override_restores_computed_display() {
    let mut state = standard_state();
    state.set_override(EditorialOverride {
        pinned_hypothesis_id: "T2".to_string(),
        reason: "desk review pending".to_string(),
        expires_at: Utc::now() + chrono::Duration::days(1),
    });
    state.clear_override();
    let engine = Engine::new(EngineConfig::default());
    let outcome = engine.run_cycle(&mut state, &snapshot(d("2025-06-02"), 100.0, 100.0, 1.0), now());
    let update = outcome.narrative.unwrap();
    assert_eq!(update.state, NarrativeState::Normal);
    assert_eq!(update.displayed_dominant_id, "T1");
}

#[test]
fn expired_override_is_ignored() {
    let mut state = standard_state();
    state.set_override(EditorialOverride {
        pinned_hypothesis_id: "T2".to_string(),
        reason: "stale lock".to_string(),
        expires_at: Utc::now() - chrono::Duration::hours(1),
    });
    let engine = Engine::new(EngineConfig::default());
    let outcome = engine.run_cycle(&mut state, &snapshot(d("2025-06-02"), 100.0, 100.0, 1.0), now());
    let update = outcome.narrative.unwrap();
    assert_eq!(update.state, NarrativeState::Normal);
    assert_eq!(update.displayed_dominant_id, "T1");
}

// ---------------------------------------------------------------------------
// 8. Evidence decay
// ---------------------------------------------------------------------------

#[test]
fn editorial_evidence_shifts_scores_and_expires() {
    let mut state = standard_state();
    let engine = Engine::new(EngineConfig::default());

    // Fresh high-diagnosticity evidence for the bear case.
    state.append_evidence(EvidenceItem {
        id: "ed-guidance-cut".to_string(),
        date: d("2025-06-02"),
        diagnosticity: Diagnosticity::Critical,
        impacts: HashMap::from([
            ("T1".to_string(), Impact::Inconsistent),
            ("T2".to_string(), Impact::Consistent),
        ]),
        decay: None,
        active: true,
        source: EvidenceSource::Editorial,
        note: "guidance cut at the midpoint".to_string(),
    });
    let outcome = engine.run_cycle(&mut state, &snapshot(d("2025-06-02"), 100.0, 100.0, 1.0), now());
    let by_id: HashMap<&str, f64> =
        outcome.hypotheses.iter().map(|h| (h.id.as_str(), h.survival_score)).collect();
    assert!(by_id["T1"] < 60.0);
    assert!(by_id["T2"] > 25.0);

    // A long-dead item expires out of the active set on its next read.
    state.append_evidence(EvidenceItem {
        id: "ed-ancient".to_string(),
        date: d("2023-01-02"),
        diagnosticity: Diagnosticity::Medium,
        impacts: HashMap::from([("T1".to_string(), Impact::Consistent)]),
        decay: None,
        active: true,
        source: EvidenceSource::Editorial,
        note: String::new(),
    });
    let outcome = engine.run_cycle(&mut state, &snapshot(d("2025-06-03"), 100.0, 100.0, 1.0), now());
    assert!(outcome.expired_evidence_ids.contains(&"ed-ancient".to_string()));
    assert!(!state.evidence.iter().find(|e| e.id == "ed-ancient").unwrap().active);
}
