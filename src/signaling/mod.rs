//! Signaling Module - Quelle eingehender Ereignisse
//!
//! Dieses Modul liefert der Call-Engine ihre externen Eingaben:
//! - Eingehende Anrufe
//! - Auflegen der Gegenseite
//! - Presence-Änderungen für das Teilnehmer-Verzeichnis
//!
//! In dieser Ausbaustufe werden die Ereignisse simuliert; eine echte
//! Transportschicht würde `SignalingSource` implementieren.

mod messages;
mod simulator;

pub use messages::SignalingEvent;
pub use simulator::{SignalingSource, SimulatedSignaling};
