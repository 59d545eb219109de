//! SQLite-backed instrument store.
//!
//! Each instrument persists as one JSON document keyed by symbol, saved
//! inside a transaction so a cycle lands atomically or not at all. A cycle
//! journal keeps one row per applied cycle for audit.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::state::InstrumentState;

pub struct StateStore {
    conn: Connection,
}

impl StateStore {
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("open state db at {}", path))?;
        Ok(Self { conn })
    }

    pub fn init(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS instruments (
                symbol TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS cycle_journal (
                symbol TEXT NOT NULL,
                cycle_date TEXT NOT NULL,
                dominant_id TEXT,
                alert INTEGER NOT NULL,
                flipped INTEGER NOT NULL,
                PRIMARY KEY (symbol, cycle_date)
            );
            COMMIT;",
        )?;
        Ok(())
    }

    /// Persist the full instrument record and its journal row together.
    pub fn save_cycle(
        &mut self,
        state: &InstrumentState,
        alert: bool,
        flipped: bool,
    ) -> Result<()> {
        let doc = serde_json::to_string(state)?;
        let cycle_date = state
            .last_cycle_date
            .map(|d| d.to_string())
            .unwrap_or_default();
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO instruments (symbol, state, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(symbol) DO UPDATE SET state = ?2, updated_at = ?3",
            params![state.instrument, doc, cycle_date],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO cycle_journal
             (symbol, cycle_date, dominant_id, alert, flipped)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                state.instrument,
                cycle_date,
                state.previous_dominant_id,
                alert as i64,
                flipped as i64
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn load(&self, symbol: &str) -> Result<Option<InstrumentState>> {
        let doc: Option<String> = self
            .conn
            .query_row(
                "SELECT state FROM instruments WHERE symbol = ?1",
                params![symbol],
                |row| row.get(0),
            )
            .optional()?;
        match doc {
            Some(json) => {
                let state = serde_json::from_str(&json)
                    .with_context(|| format!("corrupt state document for {}", symbol))?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    pub fn applied_cycles(&self, symbol: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT cycle_date FROM cycle_journal WHERE symbol = ?1 ORDER BY cycle_date",
        )?;
        let rows = stmt.query_map(params![symbol], |row| row.get(0))?;
        let mut dates = Vec::new();
        for row in rows {
            dates.push(row?);
        }
        Ok(dates)
    }
}
