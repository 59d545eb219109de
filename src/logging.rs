//! Structured logging for the scoring engine.
//!
//! Emits one JSON object per line on stdout so cycle evaluations can be
//! replayed and audited offline. Levels and domains are filterable through
//! the `LOG_LEVEL` and `LOG_DOMAINS` environment variables.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

/// Engine domains, used for filtering and for audit queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Evidence,       // Decay scoring, staleness, deactivation
    Pipeline,       // Classification, adjustments, earnings
    Normalizer,     // Simplex projection
    Narrative,      // Dominance, alerts, flips, overrides
    Overcorrection, // Monitor entry/resolution
    Correlation,    // Confirmatory layer
    Store,          // Persistence
    System,         // Startup, config, replay
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Evidence => "evidence",
            Domain::Pipeline => "pipeline",
            Domain::Normalizer => "normalizer",
            Domain::Narrative => "narrative",
            Domain::Overcorrection => "overcorrection",
            Domain::Correlation => "correlation",
            Domain::Store => "store",
            Domain::System => "system",
        }
    }

    pub fn is_enabled(&self) -> bool {
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);

/// Emit a structured log event if the level and domain pass the filters.
pub fn log(level: Level, domain: Domain, event: &str, mut fields: Map<String, Value>) {
    if level < Level::from_env() || !domain.is_enabled() {
        return;
    }
    let seq = LOG_SEQ.fetch_add(1, Ordering::SeqCst);
    fields.insert("ts".into(), Value::String(Utc::now().to_rfc3339()));
    fields.insert("seq".into(), Value::from(seq));
    fields.insert("level".into(), Value::String(level.as_str().into()));
    fields.insert("domain".into(), Value::String(domain.as_str().into()));
    fields.insert("event".into(), Value::String(event.into()));
    println!("{}", Value::Object(fields));
}

pub fn warn(domain: Domain, event: &str, fields: Map<String, Value>) {
    log(Level::Warn, domain, event, fields);
}

pub fn info(domain: Domain, event: &str, fields: Map<String, Value>) {
    log(Level::Info, domain, event, fields);
}

pub fn debug(domain: Domain, event: &str, fields: Map<String, Value>) {
    log(Level::Debug, domain, event, fields);
}

/// Build a field map from key/value pairs.
pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut m = Map::new();
    for (k, v) in pairs {
        m.insert((*k).to_string(), v.clone());
    }
    m
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}
