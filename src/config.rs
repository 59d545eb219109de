//! Engine configuration.
//!
//! All thresholds live in one explicit value that is passed into every
//! component. Nothing reads ambient process-wide state at evaluation time.
//! Defaults carry the tuned constants; `from_env` applies operator overrides;
//! `from_json_file` loads a versioned external config document.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Status-band boundary for "high conviction", as a fraction of the 0-100
/// score scale. Versioned constant: the evidence-module value (0.70) is
/// authoritative over the 0.60 variant that appeared in a later engine.
pub const HIGH_CONVICTION_RATIO: f64 = 0.70;

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// A volume-ratio band with the multiplier it applies to price-driven deltas.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VolumeBand {
    /// Upper bound of the band (exclusive); the last band is open-ended.
    pub upper: f64,
    pub multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // === Score bounds (normalizer box) ===
    pub score_floor: f64,
    pub score_ceiling: f64,

    // === Evidence decay ===
    pub default_full_weight_days: u32,
    pub default_half_life_days: f64,
    /// Decay factor below which evidence is deactivated.
    pub decay_cutoff: f64,
    /// Days before a hypothesis's own score starts bleeding for staleness.
    pub staleness_grace_days: i64,
    pub staleness_points_per_week: f64,
    pub staleness_cap: f64,

    // === Price move bands (percent magnitudes, point values) ===
    pub notable_pct: f64,
    pub significant_pct: f64,
    pub material_pct: f64,
    pub notable_points: f64,
    pub significant_points: f64,
    pub material_points: f64,

    // === Volume confirmation ===
    /// Bands over volume / 20-day average, ascending by `upper`.
    pub volume_bands: Vec<VolumeBand>,

    // === Cumulative move windows ===
    pub cumulative_5d_pct: f64,
    /// Extra fraction of today's directional delta added on a 5-day trigger.
    pub cumulative_5d_amplifier: f64,
    pub cumulative_20d_pct: f64,
    pub cumulative_60d_pct: f64,

    // === Technical levels ===
    pub technicals_enabled: bool,
    pub technical_points: f64,
    pub mean_reversion_points: f64,
    /// Deviation from the 200-day SMA treated as stretched.
    pub ma200_deviation_pct: f64,
    /// Tolerance for "at a level" checks, fraction of the level.
    pub level_tolerance: f64,

    // === External signals ===
    pub external_signals_enabled: bool,
    pub external_signal_max_points: f64,

    // === Earnings amplifier ===
    /// Trading days either side of the earnings date.
    pub earnings_window_days: u32,
    /// Moves below this magnitude are ignored inside the window.
    pub earnings_ignore_pct: f64,
    pub earnings_points: f64,

    // === Overcorrection monitor ===
    pub overcorrection_single_day_pct: f64,
    pub overcorrection_cumulative_pct: f64,
    /// Resolution window in trading days.
    pub overcorrection_window_days: u32,
    /// Reversal fraction at or above which the move is judged transient.
    pub overcorrection_confirm_reversal: f64,
    /// Reversal fraction at or above which monitoring is extended.
    pub overcorrection_extend_reversal: f64,
    /// How many times monitoring may extend before a forced resolution.
    pub overcorrection_max_extensions: u32,
    pub overcorrection_fundamental_points: f64,

    // === Narrative tracker ===
    /// Consecutive trading days a challenger must hold High before a flip.
    pub flip_confirmation_days: u32,
    /// Whether an immediate-flip signal skips the confirmation window.
    pub immediate_flip_bypasses_confirmation: bool,

    // === Correlation weighting ===
    pub correlation_windows: Vec<usize>,
    pub dislocation_material_bps: f64,

    // === Persistence ===
    pub sqlite_path: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            score_floor: 5.0,
            score_ceiling: 80.0,

            default_full_weight_days: 90,
            default_half_life_days: 120.0,
            decay_cutoff: 0.05,
            staleness_grace_days: 14,
            staleness_points_per_week: 5.0,
            staleness_cap: 25.0,

            notable_pct: 2.0,
            significant_pct: 5.0,
            material_pct: 10.0,
            notable_points: 3.0,
            significant_points: 7.0,
            material_points: 12.0,

            volume_bands: vec![
                VolumeBand { upper: 0.5, multiplier: 0.7 },   // very low
                VolumeBand { upper: 0.8, multiplier: 0.85 },  // low
                VolumeBand { upper: 1.5, multiplier: 1.0 },   // normal
                VolumeBand { upper: 2.5, multiplier: 1.25 },  // high
                VolumeBand { upper: f64::MAX, multiplier: 1.5 }, // very high
            ],

            cumulative_5d_pct: 8.0,
            cumulative_5d_amplifier: 0.5,
            cumulative_20d_pct: 15.0,
            cumulative_60d_pct: 25.0,

            technicals_enabled: true,
            technical_points: 4.0,
            mean_reversion_points: 2.0,
            ma200_deviation_pct: 15.0,
            level_tolerance: 0.01,

            external_signals_enabled: false,
            external_signal_max_points: 6.0,

            earnings_window_days: 3,
            earnings_ignore_pct: 5.0,
            earnings_points: 15.0,

            overcorrection_single_day_pct: 10.0,
            overcorrection_cumulative_pct: 15.0,
            overcorrection_window_days: 5,
            overcorrection_confirm_reversal: 0.5,
            overcorrection_extend_reversal: 0.25,
            overcorrection_max_extensions: 1,
            overcorrection_fundamental_points: 8.0,

            flip_confirmation_days: 2,
            immediate_flip_bypasses_confirmation: true,

            correlation_windows: vec![5, 10, 20],
            dislocation_material_bps: 500.0,

            sqlite_path: "narrativefx.db".to_string(),
        }
    }
}

impl EngineConfig {
    /// Defaults with environment overrides for the commonly tuned knobs.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            score_floor: env_f64("SCORE_FLOOR", d.score_floor),
            score_ceiling: env_f64("SCORE_CEILING", d.score_ceiling),
            notable_points: env_f64("NOTABLE_POINTS", d.notable_points),
            significant_points: env_f64("SIGNIFICANT_POINTS", d.significant_points),
            material_points: env_f64("MATERIAL_POINTS", d.material_points),
            cumulative_5d_pct: env_f64("CUM_5D_PCT", d.cumulative_5d_pct),
            cumulative_5d_amplifier: env_f64("CUM_5D_AMP", d.cumulative_5d_amplifier),
            technicals_enabled: env_bool("TECHNICALS_ENABLED", d.technicals_enabled),
            external_signals_enabled: env_bool("EXTERNAL_SIGNALS_ENABLED", d.external_signals_enabled),
            external_signal_max_points: env_f64("EXTERNAL_SIGNAL_MAX", d.external_signal_max_points),
            overcorrection_single_day_pct: env_f64("OC_SINGLE_DAY_PCT", d.overcorrection_single_day_pct),
            overcorrection_cumulative_pct: env_f64("OC_CUMULATIVE_PCT", d.overcorrection_cumulative_pct),
            overcorrection_window_days: env_u32("OC_WINDOW_DAYS", d.overcorrection_window_days),
            overcorrection_max_extensions: env_u32("OC_MAX_EXTENSIONS", d.overcorrection_max_extensions),
            flip_confirmation_days: env_u32("FLIP_CONFIRM_DAYS", d.flip_confirmation_days),
            immediate_flip_bypasses_confirmation: env_bool(
                "IMMEDIATE_FLIP_BYPASS",
                d.immediate_flip_bypasses_confirmation,
            ),
            sqlite_path: std::env::var("SQLITE_PATH").unwrap_or(d.sqlite_path),
            ..d
        }
    }

    /// Load a versioned config document, with defaults for absent fields
    /// handled by serde only when the file carries a full document.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("malformed config {}", path.display()))
    }

    /// Multiplier for a volume ratio; non-finite ratios are neutral.
    pub fn volume_multiplier(&self, ratio: f64) -> f64 {
        if !ratio.is_finite() || ratio < 0.0 {
            return 1.0;
        }
        for band in &self.volume_bands {
            if ratio < band.upper {
                return band.multiplier;
            }
        }
        self.volume_bands.last().map(|b| b.multiplier).unwrap_or(1.0)
    }
}
