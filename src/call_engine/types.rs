//! Gemeinsame Typen der Call-Engine
//!
//! `CallSession` und `IncomingCall` existieren nur innerhalb ihres
//! Status-Fensters und werden ausschließlich von der State Machine erzeugt.

use super::media::MediaState;
use crate::directory::Participant;
use chrono::{DateTime, Utc};
use serde::Serialize;

// ============================================================================
// CALL ID
// ============================================================================

/// Eindeutige Identität eines Anrufs, dient auch als Timer-Tag
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CallId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// CALL STATUS
// ============================================================================

/// Der eine, aktuell gültige Status der Engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    /// Kein aktiver Anruf
    #[default]
    Idle,
    /// Eingehender Anruf wartet auf Antwort
    Ringing,
    /// Verbindung wird hergestellt
    Connecting,
    /// Anruf aktiv
    Connected,
    /// Anruf beendet, geht nach dem Cooldown in `Idle` über
    Ended,
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CallStatus::Idle => "idle",
            CallStatus::Ringing => "ringing",
            CallStatus::Connecting => "connecting",
            CallStatus::Connected => "connected",
            CallStatus::Ended => "ended",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

// ============================================================================
// SESSIONS
// ============================================================================

/// Laufende Sitzung (Connecting oder Connected)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSession {
    pub call_id: CallId,
    pub appointment_id: String,
    pub participant: Participant,
    pub direction: CallDirection,
    pub connected_at: Option<DateTime<Utc>>,
}

impl CallSession {
    pub(crate) fn outgoing(appointment_id: String, participant: Participant) -> Self {
        Self {
            call_id: CallId::generate(),
            appointment_id,
            participant,
            direction: CallDirection::Outgoing,
            connected_at: None,
        }
    }
}

impl From<IncomingCall> for CallSession {
    /// Übernimmt die `call_id` des eingehenden Anrufs
    fn from(incoming: IncomingCall) -> Self {
        Self {
            call_id: incoming.call_id,
            appointment_id: incoming.appointment_id,
            participant: incoming.caller,
            direction: CallDirection::Incoming,
            connected_at: None,
        }
    }
}

/// Eingehender, noch unbeantworteter Anruf
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCall {
    pub call_id: CallId,
    pub caller: Participant,
    pub appointment_id: String,
    pub received_at: DateTime<Utc>,
}

impl IncomingCall {
    pub(crate) fn new(caller: Participant, appointment_id: Option<String>) -> Self {
        let appointment_id = appointment_id.unwrap_or_else(|| format!("adhoc-{}", caller.id));
        Self {
            call_id: CallId::generate(),
            caller,
            appointment_id,
            received_at: Utc::now(),
        }
    }
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Read-only Sicht auf den Engine-Zustand für die UI
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSnapshot {
    pub status: CallStatus,
    pub current_call: Option<CallSession>,
    pub incoming_call: Option<IncomingCall>,
    pub media: MediaState,
}
