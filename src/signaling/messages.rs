//! Event-Typen für das Signaling
//!
//! Die Ereignisse sind serde-getaggt, damit eine Transportschicht sie direkt
//! aus JSON lesen kann (`{"type": "incoming_call", ...}`).

use crate::directory::Participant;
use serde::{Deserialize, Serialize};

/// Alle Ereignisse, die eine Signaling-Quelle liefern kann
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingEvent {
    /// Eingehender Anruf
    IncomingCall {
        caller: Participant,
        #[serde(
            rename = "appointmentId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        appointment_id: Option<String>,
    },

    /// Gegenseite hat den Anruf verlassen
    RemoteLeft,

    /// Teilnehmer ist online/offline gegangen
    PresenceChanged {
        #[serde(rename = "participantId")]
        participant_id: String,
        #[serde(rename = "isOnline")]
        is_online: bool,
    },
}

// ============================================================================
// TESTS
// ============================================================================
