//! Anrufliste
//!
//! Flüchtiges, begrenztes Protokoll abgeschlossener Anrufe. Verpasste und
//! wegen Besetzt verworfene Anrufe landen hier, auch wenn die UI die
//! Notification übersehen hat.

use super::types::{CallDirection, CallId};
use crate::directory::Participant;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallOutcome {
    /// Verbunden und regulär beendet
    Completed {
        #[serde(rename = "durationMs", serialize_with = "as_millis")]
        duration: Duration,
    },
    /// Vor dem Verbinden abgebrochen
    Cancelled,
    Missed,
    Rejected,
    /// Eingehender Anruf während eines laufenden Anrufs
    Busy,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub call_id: CallId,
    pub appointment_id: String,
    pub participant: Participant,
    pub direction: CallDirection,
    pub outcome: CallOutcome,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CallHistory {
    limit: usize,
    records: VecDeque<CallRecord>,
}

impl CallHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            records: VecDeque::with_capacity(limit.min(64)),
        }
    }

    pub fn push(&mut self, record: CallRecord) {
        if self.limit == 0 {
            return;
        }
        while self.records.len() >= self.limit {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Alle Einträge, ältester zuerst
    pub fn records(&self) -> Vec<CallRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn missed(&self) -> Vec<CallRecord> {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, CallOutcome::Missed | CallOutcome::Busy))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================
