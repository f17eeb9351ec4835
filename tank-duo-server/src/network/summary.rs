//! Finished-session persistence seam.
//!
//! The registry hands every end-of-run report to a [`SummaryStore`]. What the
//! store does with it (database, analytics, nothing) is outside this crate.

use std::sync::Mutex;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::info;

use crate::game::difficulty::DifficultyConfig;
use crate::network::protocol::{SessionCode, SessionSummary};

/// A session that a peer declared finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishedSession {
    /// Session code at the time of the report.
    pub code: SessionCode,
    /// Display names of the occupied slots, host first.
    pub participants: Vec<String>,
    /// Difficulty the run used, if it was started.
    pub difficulty: Option<DifficultyConfig>,
    /// Seed the run used, if it was started.
    pub seed: Option<u32>,
    /// Outcome and counters.
    pub summary: SessionSummary,
    /// When the server received the report.
    pub recorded_at: DateTime<Utc>,
}

/// Errors from a summary store.
#[derive(Debug, Error)]
pub enum SummaryError {
    /// Backing service could not be reached.
    #[error("summary store unavailable: {0}")]
    Unavailable(String),

    /// Backing service refused the record.
    #[error("summary rejected: {0}")]
    Rejected(String),
}

/// Accepts finished-session reports.
pub trait SummaryStore: Send + Sync {
    /// Persist one report.
    fn record(&self, finished: &FinishedSession) -> Result<(), SummaryError>;
}

/// Writes each report to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSummaryStore;

impl SummaryStore for TracingSummaryStore {
    fn record(&self, finished: &FinishedSession) -> Result<(), SummaryError> {
        let kills: u32 = finished.summary.players.iter().map(|p| p.kills).sum();
        info!(
            code = %finished.code,
            outcome = ?finished.summary.outcome,
            participants = ?finished.participants,
            seed = ?finished.seed,
            kills,
            "Session finished"
        );
        Ok(())
    }
}

/// Keeps reports in memory.
#[derive(Debug, Default)]
pub struct MemorySummaryStore {
    records: Mutex<Vec<FinishedSession>>,
}

impl MemorySummaryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies of every report recorded so far.
    pub fn records(&self) -> Vec<FinishedSession> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl SummaryStore for MemorySummaryStore {
    fn record(&self, finished: &FinishedSession) -> Result<(), SummaryError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| SummaryError::Unavailable("memory store poisoned".to_string()))?;
        records.push(finished.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::protocol::{Outcome, PlayerStats};

    fn finished() -> FinishedSession {
        FinishedSession {
            code: SessionCode::new("ABCDEF"),
            participants: vec!["host".to_string(), "guest".to_string()],
            difficulty: Some(DifficultyConfig::multiplayer()),
            seed: Some(42),
            summary: SessionSummary {
                outcome: Outcome::Win,
                players: vec![PlayerStats {
                    name: "host".to_string(),
                    final_health: 3,
                    kills: 12,
                    damage_dealt: 40,
                    damage_received: 7,
                    survival_secs: 300,
                    won: true,
                }],
            },
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_memory_store_keeps_records() {
        let store = MemorySummaryStore::new();
        store.record(&finished()).unwrap();
        store.record(&finished()).unwrap();

        let records = store.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].participants, vec!["host", "guest"]);
    }

    #[test]
    fn test_tracing_store_accepts() {
        assert!(TracingSummaryStore.record(&finished()).is_ok());
    }
}
