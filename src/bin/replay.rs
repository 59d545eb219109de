use std::fs::File;
use std::io::BufReader;

use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;

use narrativefx::config::EngineConfig;
use narrativefx::engine::{CycleSnapshot, Engine};
use narrativefx::narrative::{Hypothesis, Stance};
use narrativefx::state::InstrumentState;
use narrativefx::storage::StateStore;

#[derive(Deserialize)]
struct HypothesisSeed {
    id: String,
    name: String,
    stance: Stance,
    score: f64,
    created_at: NaiveDate,
}

#[derive(Deserialize)]
struct ReplayFile {
    instrument: String,
    hypotheses: Vec<HypothesisSeed>,
    snapshots: Vec<CycleSnapshot>,
}

fn main() {
    let path = std::env::args().nth(1).unwrap_or_else(|| "replay.json".to_string());
    let file = match File::open(&path) {
        Ok(f) => f,
        Err(err) => {
            eprintln!("failed to open {}: {}", path, err);
            return;
        }
    };
    let replay: ReplayFile = match serde_json::from_reader(BufReader::new(file)) {
        Ok(r) => r,
        Err(err) => {
            eprintln!("failed to parse {}: {}", path, err);
            return;
        }
    };

    let cfg = match std::env::var("CONFIG_PATH") {
        Ok(config_path) => match EngineConfig::from_json_file(std::path::Path::new(&config_path)) {
            Ok(c) => c,
            Err(err) => {
                eprintln!("failed to load config {}: {}", config_path, err);
                return;
            }
        },
        Err(_) => EngineConfig::from_env(),
    };
    let mut store = match StateStore::new(&cfg.sqlite_path) {
        Ok(s) => s,
        Err(err) => {
            eprintln!("failed to open state store: {}", err);
            return;
        }
    };
    if let Err(err) = store.init() {
        eprintln!("failed to init state store: {}", err);
        return;
    }

    let mut state = match store.load(&replay.instrument) {
        Ok(Some(existing)) => existing,
        Ok(None) => InstrumentState::new(
            &replay.instrument,
            replay
                .hypotheses
                .iter()
                .map(|h| Hypothesis::new(&h.id, &h.name, h.stance, h.score, h.created_at))
                .collect(),
        ),
        Err(err) => {
            eprintln!("failed to load instrument state: {}", err);
            return;
        }
    };

    let engine = Engine::new(cfg);
    for snapshot in &replay.snapshots {
        let outcome = engine.run_cycle(&mut state, snapshot, Utc::now());
        let narrative = outcome.narrative.as_ref();
        let summary = json!({
            "date": outcome.date.to_string(),
            "band": outcome.meta.band,
            "pct_change": outcome.meta.pct_change,
            "volume_multiplier": outcome.meta.volume_multiplier,
            "scores": outcome
                .hypotheses
                .iter()
                .map(|h| json!({"id": h.id, "score": h.survival_score, "status": h.status}))
                .collect::<Vec<_>>(),
            "dominant": narrative.map(|n| n.dominant_id.clone()),
            "displayed": narrative.map(|n| n.displayed_dominant_id.clone()),
            "alert": narrative.map(|n| n.alert).unwrap_or(false),
            "flip": narrative.and_then(|n| n.flip.as_ref()).map(|f| f.trigger.clone()),
            "overcorrection": outcome.overcorrection.as_ref().map(|r| r.status),
            "top_narrative": outcome.correlation.as_ref().map(|c| c.top_id.clone()),
            "inflection": outcome.correlation.as_ref().map(|c| c.inflection).unwrap_or(false),
        });
        println!("{}", summary);

        let alert = narrative.map(|n| n.alert).unwrap_or(false);
        let flipped = narrative.map(|n| n.flip.is_some()).unwrap_or(false);
        if let Err(err) = store.save_cycle(&state, alert, flipped) {
            eprintln!("failed to persist cycle {}: {}", outcome.date, err);
            return;
        }
    }
}
