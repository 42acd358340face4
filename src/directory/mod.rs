//! Directory Module - Teilnehmer und Presence
//!
//! Dieses Modul liefert die Teilnehmer, die für Video-Termine erreichbar sind:
//! - Rolle (Student / Officer) und Anzeigename
//! - Live Online-Status, gepflegt über Signaling-Events
//!

mod participants;

pub use participants::{DirectoryError, Participant, ParticipantDirectory, Role};
