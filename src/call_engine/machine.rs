//! Call Session State Machine
//!
//! Besitzt den einen lokalen Anruf: `Idle → Ringing → Connecting → Connected
//! → Ended → Idle`. Alle Befehle laufen synchron und vollständig durch; die
//! einzige asynchrone Rückkehr in die Maschine sind ausgelöste Timer.
//!
//! Jeder Timer wird mit der `CallId` seines Anrufs getaggt. Beim Auslösen
//! wird gegen die `CallId` des *aktuellen* Anrufs verglichen, nie gegen einen
//! zwischengespeicherten Status.

use super::history::{CallHistory, CallOutcome, CallRecord};
use super::media::MediaState;
use super::timers::{Scheduler, Timer, TimerFired, TimerHandle, TimerKind};
use super::types::{CallDirection, CallId, CallSession, CallSnapshot, CallStatus, IncomingCall};
use crate::config::{EngineConfig, PresencePolicy};
use crate::directory::{Participant, ParticipantDirectory};
use crate::notifications::{Notification, NotificationKind, NotificationSink, Severity};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Ergebnisse von Befehlen, die keinen Übergang auslösen
///
/// Keiner dieser Fehler verlässt die Befehlsgrenze der State Machine; sie
/// werden geloggt und ggf. als Notification gemeldet.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallEngineError {
    #[error("Already in a call")]
    AlreadyInCall,

    #[error("No pending incoming call")]
    NoPendingCall,

    #[error("No active call")]
    NoActiveSession,

    #[error("Stale {kind:?} timer for call {call_id}")]
    StaleTimer { kind: TimerKind, call_id: CallId },

    #[error("Participant {0} is offline")]
    ParticipantOffline(String),

    #[error("Call engine is no longer running")]
    EngineStopped,
}

// ============================================================================
// PHASE
// ============================================================================

/// Status samt der Daten, die nur in diesem Status existieren
#[derive(Debug, Clone)]
enum Phase {
    Idle,
    Ringing(IncomingCall),
    Connecting(CallSession),
    Connected(CallSession),
    Ended { call_id: CallId },
}

impl Phase {
    fn status(&self) -> CallStatus {
        match self {
            Phase::Idle => CallStatus::Idle,
            Phase::Ringing(_) => CallStatus::Ringing,
            Phase::Connecting(_) => CallStatus::Connecting,
            Phase::Connected(_) => CallStatus::Connected,
            Phase::Ended { .. } => CallStatus::Ended,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndReason {
    LocalHangup,
    RemoteLeft,
}

// ============================================================================
// STATE MACHINE
// ============================================================================

pub struct CallStateMachine<S: Scheduler> {
    config: EngineConfig,
    phase: Phase,
    media: MediaState,
    pending_timer: Option<TimerHandle>,
    scheduler: S,
    notifier: Arc<dyn NotificationSink>,
    directory: Option<Arc<ParticipantDirectory>>,
    history: CallHistory,
}

impl<S: Scheduler> CallStateMachine<S> {
    pub fn new(config: EngineConfig, scheduler: S, notifier: Arc<dyn NotificationSink>) -> Self {
        let history = CallHistory::new(config.history_limit);
        Self {
            config,
            phase: Phase::Idle,
            media: MediaState::default(),
            pending_timer: None,
            scheduler,
            notifier,
            directory: None,
            history,
        }
    }

    /// Live-Presence aus dem Verzeichnis statt aus dem Snapshot lesen
    pub fn with_directory(mut self, directory: Arc<ParticipantDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    // ========================================================================
    // OBSERVABLE STATE
    // ========================================================================

    pub fn status(&self) -> CallStatus {
        self.phase.status()
    }

    pub fn current_call(&self) -> Option<&CallSession> {
        match &self.phase {
            Phase::Connecting(session) | Phase::Connected(session) => Some(session),
            _ => None,
        }
    }

    pub fn incoming_call(&self) -> Option<&IncomingCall> {
        match &self.phase {
            Phase::Ringing(incoming) => Some(incoming),
            _ => None,
        }
    }

    pub fn media(&self) -> MediaState {
        self.media
    }

    pub fn history(&self) -> &CallHistory {
        &self.history
    }

    pub fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            status: self.status(),
            current_call: self.current_call().cloned(),
            incoming_call: self.incoming_call().cloned(),
            media: self.media,
        }
    }

    // ========================================================================
    // COMMANDS
    // ========================================================================

    /// Startet einen ausgehenden Anruf für einen Termin
    pub fn start_call(&mut self, appointment_id: impl Into<String>, participant: Participant) {
        let result = self.try_start_call(appointment_id.into(), participant);
        self.finish("start_call", result);
    }

    /// Nimmt den wartenden Anruf an
    pub fn accept_call(&mut self) {
        let result = self.try_accept_call();
        self.finish("accept_call", result);
    }

    /// Lehnt den wartenden Anruf ab
    pub fn reject_call(&mut self) {
        let result = self.try_reject_call();
        self.finish("reject_call", result);
    }

    /// Legt auf
    pub fn end_call(&mut self) {
        let result = self.try_end_call(EndReason::LocalHangup);
        self.finish("end_call", result);
    }

    pub fn toggle_video(&mut self) {
        let on = self.media.toggle_video();
        self.media_notice(if on { "Camera enabled" } else { "Camera disabled" });
    }

    pub fn toggle_audio(&mut self) {
        let on = self.media.toggle_audio();
        self.media_notice(if on {
            "Microphone unmuted"
        } else {
            "Microphone muted"
        });
    }

    pub fn toggle_screen_share(&mut self) {
        let on = self.media.toggle_screen_share();
        self.media_notice(if on {
            "Screen sharing started"
        } else {
            "Screen sharing stopped"
        });
    }

    // ========================================================================
    // SIGNALING INPUTS
    // ========================================================================

    /// Eingehender Anruf vom Signaling
    pub fn receive_incoming_call(&mut self, caller: Participant, appointment_id: Option<String>) {
        let result = self.try_receive_incoming_call(caller, appointment_id);
        self.finish("incoming_call", result);
    }

    /// Gegenseite hat aufgelegt
    pub fn remote_left(&mut self) {
        // Anrufer legt auf, bevor wir abheben
        let result = if matches!(self.phase, Phase::Ringing(_)) {
            self.cancel_pending_timer();
            self.miss_incoming();
            Ok(())
        } else {
            self.try_end_call(EndReason::RemoteLeft)
        };
        self.finish("remote_left", result);
    }

    // ========================================================================
    // TIMERS
    // ========================================================================

    /// Verarbeitet einen ausgelösten Timer
    ///
    /// Timer, deren `CallId` nicht mehr zum aktuellen Anruf passt, sind
    /// wirkungslos.
    pub fn handle_timer(&mut self, fired: TimerFired) {
        if self.pending_timer == Some(fired.handle) {
            self.pending_timer = None;
        }

        let Timer { kind, call_id } = fired.timer;
        let is_current = match (&self.phase, kind) {
            (Phase::Ringing(incoming), TimerKind::RingTimeout) => incoming.call_id == call_id,
            (Phase::Connecting(session), TimerKind::ConnectLatency) => session.call_id == call_id,
            (Phase::Ended { call_id: ended }, TimerKind::Cooldown) => *ended == call_id,
            _ => false,
        };

        if !is_current {
            tracing::debug!("{}", CallEngineError::StaleTimer { kind, call_id });
            return;
        }

        match kind {
            TimerKind::RingTimeout => self.miss_incoming(),
            TimerKind::ConnectLatency => self.complete_connect(),
            TimerKind::Cooldown => {
                tracing::info!(call_id = %call_id, "Cooldown finished, back to idle");
                self.phase = Phase::Idle;
            }
        }
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    fn try_start_call(
        &mut self,
        appointment_id: String,
        participant: Participant,
    ) -> Result<(), CallEngineError> {
        self.ensure_idle()?;
        self.ensure_reachable(&participant)?;

        let session = CallSession::outgoing(appointment_id, participant);
        tracing::info!(
            call_id = %session.call_id,
            appointment_id = %session.appointment_id,
            "Calling {}",
            session.participant.name
        );
        self.notify(Notification::info(
            NotificationKind::Calling,
            format!("Calling {}", session.participant.name),
        ));

        self.arm_timer(
            self.config.connect_latency(),
            TimerKind::ConnectLatency,
            session.call_id.clone(),
        );
        self.phase = Phase::Connecting(session);
        Ok(())
    }

    fn try_receive_incoming_call(
        &mut self,
        caller: Participant,
        appointment_id: Option<String>,
    ) -> Result<(), CallEngineError> {
        let incoming = IncomingCall::new(caller, appointment_id);

        if self.status() != CallStatus::Idle {
            tracing::warn!(
                call_id = %incoming.call_id,
                status = %self.status(),
                "Dropping incoming call from {}: line busy",
                incoming.caller.name
            );
            self.record(
                incoming.call_id,
                incoming.appointment_id,
                incoming.caller,
                CallDirection::Incoming,
                CallOutcome::Busy,
            );
            self.notify(Notification::new(
                NotificationKind::AlreadyInCall,
                Severity::Warning,
                "Already in a call",
            ));
            return Err(CallEngineError::AlreadyInCall);
        }

        tracing::info!(
            call_id = %incoming.call_id,
            "Incoming call from {} ({})",
            incoming.caller.name,
            incoming.caller.id
        );
        self.notify(Notification::info(
            NotificationKind::IncomingCall,
            format!("Incoming call from {}", incoming.caller.name),
        ));

        self.arm_timer(
            self.config.ring_timeout(),
            TimerKind::RingTimeout,
            incoming.call_id.clone(),
        );
        self.phase = Phase::Ringing(incoming);
        Ok(())
    }

    fn try_accept_call(&mut self) -> Result<(), CallEngineError> {
        let incoming = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Ringing(incoming) => incoming,
            other => {
                self.phase = other;
                return Err(CallEngineError::NoPendingCall);
            }
        };
        self.cancel_pending_timer();

        if !self.is_reachable(&incoming.caller) {
            let name = incoming.caller.name.clone();
            let id = incoming.caller.id.clone();
            self.record(
                incoming.call_id,
                incoming.appointment_id,
                incoming.caller,
                CallDirection::Incoming,
                CallOutcome::Missed,
            );
            self.notify(Notification::new(
                NotificationKind::ParticipantOffline,
                Severity::Error,
                format!("{} is offline", name),
            ));
            return Err(CallEngineError::ParticipantOffline(id));
        }

        let session = CallSession::from(incoming);
        tracing::info!(call_id = %session.call_id, "Accepted call from {}", session.participant.name);
        self.notify(Notification::info(
            NotificationKind::Accepted,
            format!("Joining call with {}", session.participant.name),
        ));

        self.arm_timer(
            self.config.connect_latency(),
            TimerKind::ConnectLatency,
            session.call_id.clone(),
        );
        self.phase = Phase::Connecting(session);
        Ok(())
    }

    fn try_reject_call(&mut self) -> Result<(), CallEngineError> {
        let incoming = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Ringing(incoming) => incoming,
            other => {
                self.phase = other;
                return Err(CallEngineError::NoPendingCall);
            }
        };
        self.cancel_pending_timer();

        tracing::info!(call_id = %incoming.call_id, "Rejected call from {}", incoming.caller.name);
        let message = format!("Call from {} rejected", incoming.caller.name);
        self.record(
            incoming.call_id,
            incoming.appointment_id,
            incoming.caller,
            CallDirection::Incoming,
            CallOutcome::Rejected,
        );
        self.notify(Notification::info(NotificationKind::Rejected, message));
        Ok(())
    }

    fn try_end_call(&mut self, reason: EndReason) -> Result<(), CallEngineError> {
        let session = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Connecting(session) | Phase::Connected(session) => session,
            other => {
                self.phase = other;
                return Err(CallEngineError::NoActiveSession);
            }
        };
        self.cancel_pending_timer();
        self.media.reset_for_call_end();

        let outcome = match session.connected_at {
            Some(connected_at) => CallOutcome::Completed {
                duration: (Utc::now() - connected_at)
                    .to_std()
                    .unwrap_or(Duration::ZERO),
            },
            None => CallOutcome::Cancelled,
        };

        tracing::info!(call_id = %session.call_id, ?reason, "Call ended");
        let notification = match reason {
            EndReason::LocalHangup => Notification::info(NotificationKind::Ended, "Call ended"),
            EndReason::RemoteLeft => Notification::info(
                NotificationKind::RemoteLeft,
                format!("{} left the call", session.participant.name),
            ),
        };

        let call_id = session.call_id;
        self.arm_timer(self.config.cooldown(), TimerKind::Cooldown, call_id.clone());
        self.phase = Phase::Ended {
            call_id: call_id.clone(),
        };
        self.record(
            call_id,
            session.appointment_id,
            session.participant,
            session.direction,
            outcome,
        );
        self.notify(notification);
        Ok(())
    }

    /// Ringing → Idle ohne Antwort
    fn miss_incoming(&mut self) {
        let incoming = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Ringing(incoming) => incoming,
            other => {
                self.phase = other;
                return;
            }
        };

        tracing::info!(call_id = %incoming.call_id, "Missed call from {}", incoming.caller.name);
        let message = format!("Missed call from {}", incoming.caller.name);
        self.record(
            incoming.call_id,
            incoming.appointment_id,
            incoming.caller,
            CallDirection::Incoming,
            CallOutcome::Missed,
        );
        self.notify(Notification::new(
            NotificationKind::Missed,
            Severity::Warning,
            message,
        ));
    }

    /// Connecting → Connected
    fn complete_connect(&mut self) {
        let mut session = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Connecting(session) => session,
            other => {
                self.phase = other;
                return;
            }
        };
        session.connected_at = Some(Utc::now());

        tracing::info!(call_id = %session.call_id, "Connected with {}", session.participant.name);
        self.notify(Notification::new(
            NotificationKind::Connected,
            Severity::Success,
            format!("Connected with {}", session.participant.name),
        ));
        self.phase = Phase::Connected(session);
    }

    fn ensure_idle(&self) -> Result<(), CallEngineError> {
        if self.status() == CallStatus::Idle {
            return Ok(());
        }
        self.notify(Notification::new(
            NotificationKind::AlreadyInCall,
            Severity::Warning,
            "Already in a call",
        ));
        Err(CallEngineError::AlreadyInCall)
    }

    fn ensure_reachable(&self, participant: &Participant) -> Result<(), CallEngineError> {
        if self.is_reachable(participant) {
            return Ok(());
        }
        self.notify(Notification::new(
            NotificationKind::ParticipantOffline,
            Severity::Error,
            format!("{} is offline", participant.name),
        ));
        Err(CallEngineError::ParticipantOffline(participant.id.clone()))
    }

    /// Unter `Advisory` ist jeder Teilnehmer erreichbar
    fn is_reachable(&self, participant: &Participant) -> bool {
        match self.config.presence_policy {
            PresencePolicy::Advisory => true,
            PresencePolicy::RequireOnline => self
                .directory
                .as_ref()
                .and_then(|d| d.presence(&participant.id))
                .unwrap_or(participant.is_online),
        }
    }

    fn arm_timer(&mut self, delay: Duration, kind: TimerKind, call_id: CallId) {
        self.cancel_pending_timer();
        let handle = self.scheduler.schedule(delay, Timer { kind, call_id });
        self.pending_timer = Some(handle);
    }

    fn cancel_pending_timer(&mut self) {
        if let Some(handle) = self.pending_timer.take() {
            self.scheduler.cancel(handle);
        }
    }

    fn record(
        &mut self,
        call_id: CallId,
        appointment_id: String,
        participant: Participant,
        direction: CallDirection,
        outcome: CallOutcome,
    ) {
        self.history.push(CallRecord {
            call_id,
            appointment_id,
            participant,
            direction,
            outcome,
            at: Utc::now(),
        });
    }

    fn media_notice(&self, message: &str) {
        tracing::debug!(media = ?self.media, "{}", message);
        self.notify(Notification::info(NotificationKind::MediaToggled, message));
    }

    fn notify(&self, notification: Notification) {
        self.notifier.notify(notification);
    }

    fn finish(&self, command: &str, result: Result<(), CallEngineError>) {
        if let Err(e) = result {
            tracing::debug!(command, status = %self.status(), "Command had no effect: {}", e);
        }
    }
}

impl<S: Scheduler> std::fmt::Debug for CallStateMachine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallStateMachine")
            .field("status", &self.status())
            .field("media", &self.media)
            .field("pending_timer", &self.pending_timer)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
