//! Call Engine - Async Handle über der State Machine
//!
//! Ein einzelner Tokio-Task besitzt die `CallStateMachine`. Befehle, Signaling
//! und ausgelöste Timer landen alle in derselben Mailbox und werden streng in
//! Ankunftsreihenfolge abgearbeitet.

use super::history::CallRecord;
use super::machine::{CallEngineError, CallStateMachine};
use super::timers::{TimerFired, TokioScheduler};
use super::types::{CallSnapshot, CallStatus};
use crate::config::EngineConfig;
use crate::directory::{Participant, ParticipantDirectory};
use crate::notifications::{BroadcastNotifier, Notification};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

// ============================================================================
// MAILBOX
// ============================================================================

#[derive(Debug)]
enum Command {
    StartCall {
        appointment_id: String,
        participant: Participant,
    },
    AcceptCall,
    RejectCall,
    EndCall,
    ToggleVideo,
    ToggleAudio,
    ToggleScreenShare,
    IncomingCall {
        caller: Participant,
        appointment_id: Option<String>,
    },
    RemoteLeft,
    TimerFired(TimerFired),
    History(oneshot::Sender<Vec<CallRecord>>),
    Shutdown,
}

impl From<TimerFired> for Command {
    fn from(fired: TimerFired) -> Self {
        Command::TimerFired(fired)
    }
}

// ============================================================================
// CALL ENGINE
// ============================================================================

/// Cloneable Handle auf die laufende Call-Engine
///
/// Sobald alle Handles gedroppt sind, beendet sich der Engine-Task.
#[derive(Clone)]
pub struct CallEngine {
    tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<CallSnapshot>,
    notifier: BroadcastNotifier,
}

impl CallEngine {
    /// Startet den Engine-Task
    ///
    /// Muss innerhalb einer Tokio-Runtime aufgerufen werden.
    pub fn spawn(
        config: EngineConfig,
        directory: Option<Arc<ParticipantDirectory>>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let notifier = BroadcastNotifier::default();

        let scheduler = TokioScheduler::new(tx.downgrade());
        let mut machine = CallStateMachine::new(config, scheduler, Arc::new(notifier.clone()));
        if let Some(directory) = directory {
            machine = machine.with_directory(directory);
        }

        let (state_tx, state_rx) = watch::channel(machine.snapshot());
        let task = tokio::spawn(run(machine, rx, state_tx));

        let engine = Self {
            tx,
            state_rx,
            notifier,
        };
        (engine, task)
    }

    /// Gibt einen Notification-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    /// Gibt einen Receiver für Zustandsänderungen zurück
    pub fn watch_state(&self) -> watch::Receiver<CallSnapshot> {
        self.state_rx.clone()
    }

    /// Gibt den zuletzt veröffentlichten Zustand zurück
    pub fn snapshot(&self) -> CallSnapshot {
        self.state_rx.borrow().clone()
    }

    /// Gibt den aktuellen Call-Status zurück
    pub fn state(&self) -> CallStatus {
        self.state_rx.borrow().status
    }

    // ========================================================================
    // COMMANDS
    // ========================================================================

    /// Startet einen ausgehenden Anruf
    pub fn start_call(
        &self,
        appointment_id: impl Into<String>,
        participant: Participant,
    ) -> Result<(), CallEngineError> {
        self.send(Command::StartCall {
            appointment_id: appointment_id.into(),
            participant,
        })
    }

    /// Akzeptiert einen eingehenden Anruf
    pub fn accept_call(&self) -> Result<(), CallEngineError> {
        self.send(Command::AcceptCall)
    }

    /// Lehnt einen eingehenden Anruf ab
    pub fn reject_call(&self) -> Result<(), CallEngineError> {
        self.send(Command::RejectCall)
    }

    /// Beendet den aktuellen Anruf
    pub fn end_call(&self) -> Result<(), CallEngineError> {
        self.send(Command::EndCall)
    }

    pub fn toggle_video(&self) -> Result<(), CallEngineError> {
        self.send(Command::ToggleVideo)
    }

    pub fn toggle_audio(&self) -> Result<(), CallEngineError> {
        self.send(Command::ToggleAudio)
    }

    pub fn toggle_screen_share(&self) -> Result<(), CallEngineError> {
        self.send(Command::ToggleScreenShare)
    }

    /// Registriert einen eingehenden Anruf (Signaling)
    pub fn inject_incoming_call(
        &self,
        caller: Participant,
        appointment_id: Option<String>,
    ) -> Result<(), CallEngineError> {
        self.send(Command::IncomingCall {
            caller,
            appointment_id,
        })
    }

    /// Gegenseite hat aufgelegt (Signaling)
    pub fn inject_remote_left(&self) -> Result<(), CallEngineError> {
        self.send(Command::RemoteLeft)
    }

    /// Gibt die Anrufliste zurück, ältester Eintrag zuerst
    pub async fn history(&self) -> Result<Vec<CallRecord>, CallEngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::History(reply_tx))?;
        reply_rx.await.map_err(|_| CallEngineError::EngineStopped)
    }

    /// Stoppt den Engine-Task; offene Timer werden verworfen
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }

    fn send(&self, command: Command) -> Result<(), CallEngineError> {
        self.tx
            .send(command)
            .map_err(|_| CallEngineError::EngineStopped)
    }
}

impl std::fmt::Debug for CallEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallEngine")
            .field("state", &self.state())
            .finish()
    }
}

// ============================================================================
// ENGINE TASK
// ============================================================================

async fn run(
    mut machine: CallStateMachine<TokioScheduler<Command>>,
    mut rx: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<CallSnapshot>,
) {
    tracing::info!("Call engine started");

    while let Some(command) = rx.recv().await {
        match command {
            Command::StartCall {
                appointment_id,
                participant,
            } => machine.start_call(appointment_id, participant),
            Command::AcceptCall => machine.accept_call(),
            Command::RejectCall => machine.reject_call(),
            Command::EndCall => machine.end_call(),
            Command::ToggleVideo => machine.toggle_video(),
            Command::ToggleAudio => machine.toggle_audio(),
            Command::ToggleScreenShare => machine.toggle_screen_share(),
            Command::IncomingCall {
                caller,
                appointment_id,
            } => machine.receive_incoming_call(caller, appointment_id),
            Command::RemoteLeft => machine.remote_left(),
            Command::TimerFired(fired) => machine.handle_timer(fired),
            Command::History(reply) => {
                let _ = reply.send(machine.history().records());
                continue;
            }
            Command::Shutdown => break,
        }

        let snapshot = machine.snapshot();
        state_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    tracing::info!("Call engine stopped");
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_engine::history::CallOutcome;
    use crate::directory::Role;
    use crate::notifications::NotificationKind;
    use std::time::Duration;

    /// Lässt den Engine-Task die Mailbox abarbeiten
    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    async fn advance(ms: u64) {
        settle().await;
        tokio::time::advance(Duration::from_millis(ms)).await;
        settle().await;
    }

    fn ahmed() -> Participant {
        Participant::new("p1", "Ahmed", Role::Officer)
    }

    fn dana() -> Participant {
        Participant::new("c1", "Dana", Role::Student)
    }

    fn drain(rx: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = rx.try_recv() {
            out.push(n);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_outgoing_call_lifecycle() {
        let (engine, _task) = CallEngine::spawn(EngineConfig::default(), None);
        let mut notes = engine.subscribe();

        engine.start_call("appt-1", ahmed()).unwrap();
        settle().await;
        assert_eq!(engine.state(), CallStatus::Connecting);

        advance(1501).await;
        assert_eq!(engine.state(), CallStatus::Connected);
        let messages: Vec<_> = drain(&mut notes).into_iter().map(|n| n.message).collect();
        assert_eq!(messages, vec!["Calling Ahmed", "Connected with Ahmed"]);

        engine.toggle_screen_share().unwrap();
        engine.end_call().unwrap();
        settle().await;
        let snap = engine.snapshot();
        assert_eq!(snap.status, CallStatus::Ended);
        assert!(!snap.media.screen_sharing);

        advance(2001).await;
        assert_eq!(engine.state(), CallStatus::Idle);

        let history = engine.history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(matches!(history[0].outcome, CallOutcome::Completed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ring_timeout_and_stale_timer() {
        let (engine, _task) = CallEngine::spawn(EngineConfig::default(), None);
        let mut notes = engine.subscribe();

        engine.inject_incoming_call(dana(), None).unwrap();
        settle().await;
        assert_eq!(engine.state(), CallStatus::Ringing);

        // Ablehnen und sofort neuer Anruf: der alte Klingel-Timer darf nicht greifen
        advance(10_000).await;
        engine.reject_call().unwrap();
        engine
            .inject_incoming_call(Participant::new("c2", "Omar", Role::Student), None)
            .unwrap();
        settle().await;

        advance(5_000).await;
        let snap = engine.snapshot();
        assert_eq!(snap.status, CallStatus::Ringing);
        assert_eq!(snap.incoming_call.unwrap().caller.name, "Omar");

        advance(10_001).await;
        assert_eq!(engine.state(), CallStatus::Idle);

        let missed: Vec<_> = drain(&mut notes)
            .into_iter()
            .filter(|n| n.kind == NotificationKind::Missed)
            .map(|n| n.message)
            .collect();
        assert_eq!(missed, vec!["Missed call from Omar"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_while_connected() {
        let (engine, _task) = CallEngine::spawn(EngineConfig::default(), None);
        engine.inject_incoming_call(dana(), None).unwrap();
        engine.accept_call().unwrap();
        advance(1501).await;
        assert_eq!(engine.state(), CallStatus::Connected);

        let mut notes = engine.subscribe();
        let before = engine.snapshot();
        engine
            .inject_incoming_call(Participant::new("c2", "Omar", Role::Student), None)
            .unwrap();
        settle().await;

        assert_eq!(engine.snapshot(), before);
        assert_eq!(
            drain(&mut notes).pop().map(|n| n.message).as_deref(),
            Some("Already in a call")
        );

        engine.inject_remote_left().unwrap();
        settle().await;
        assert_eq!(engine.state(), CallStatus::Ended);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_state_sees_transitions() {
        let (engine, _task) = CallEngine::spawn(EngineConfig::default(), None);
        let mut state = engine.watch_state();

        engine.start_call("appt-1", ahmed()).unwrap();
        state.changed().await.unwrap();
        assert_eq!(state.borrow_and_update().status, CallStatus::Connecting);

        tokio::time::advance(Duration::from_millis(1501)).await;
        state.changed().await.unwrap();
        assert_eq!(state.borrow_and_update().status, CallStatus::Connected);
    }

    #[tokio::test]
    async fn test_shutdown_stops_engine() {
        let (engine, task) = CallEngine::spawn(EngineConfig::default(), None);
        engine.shutdown();
        task.await.unwrap();

        assert_eq!(
            engine.start_call("appt-1", ahmed()),
            Err(CallEngineError::EngineStopped)
        );
        assert_eq!(engine.history().await, Err(CallEngineError::EngineStopped));
    }

    #[tokio::test]
    async fn test_dropping_all_handles_stops_engine() {
        let (engine, task) = CallEngine::spawn(EngineConfig::default(), None);
        engine.start_call("appt-1", ahmed()).unwrap();
        drop(engine);
        task.await.unwrap();
    }
}
