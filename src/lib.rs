//! Evidence-weighted survival scoring for competing instrument narratives.
//!
//! One cycle per instrument per trading day: evidence decays, the price
//! classifier and overcorrection monitor adjust raw scores, the normalizer
//! projects them onto a bounded simplex, the narrative tracker updates
//! dominance, and correlation weighting cross-checks the result against
//! price action.

pub mod calendar;
pub mod config;
pub mod correlation;
pub mod engine;
pub mod evidence;
pub mod logging;
pub mod narrative;
pub mod normalizer;
pub mod overcorrection;
pub mod pipeline;
pub mod state;
pub mod storage;
pub mod technicals;
