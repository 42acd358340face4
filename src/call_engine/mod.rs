//! Call Engine Module - Anrufsteuerung für Video-Termine
//!
//! Dieses Modul verwaltet:
//! - Die State Machine des einen lokalen Anrufs
//! - Verzögerte Übergänge über einen Scheduler (Klingeln, Verbinden, Cooldown)
//! - Kamera-, Mikrofon- und Freigabe-Schalter
//! - Die Anrufliste

mod engine;
mod history;
mod machine;
mod media;
mod timers;
mod types;

pub use engine::CallEngine;
pub use history::{CallHistory, CallOutcome, CallRecord};
pub use machine::{CallEngineError, CallStateMachine};
pub use media::MediaState;
pub use timers::{
    ManualScheduler, Scheduler, Timer, TimerFired, TimerHandle, TimerKind, TokioScheduler,
};
pub use types::{CallDirection, CallId, CallSession, CallSnapshot, CallStatus, IncomingCall};
