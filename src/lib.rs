//! Appointment Call - Anrufsteuerung für Video-Termine
//!
//! Koordiniert einen Eins-zu-eins-Anruf zwischen dem lokalen Endpunkt und
//! einem Teilnehmer (Student oder Officer):
//! - State Machine mit Klingel-Timeout, Annehmen/Ablehnen und Cooldown
//! - Identitätsgeprüfte Timer, damit alte Timer keinen neuen Anruf verändern
//! - Kamera/Mikrofon/Bildschirmfreigabe als UI-Schalter
//! - Notifications für die Toast-Schicht der UI
//!
//! Es werden keine Medien übertragen; die Engine verwaltet nur Zustand.

pub mod call_engine;
pub mod config;
pub mod directory;
pub mod notifications;
pub mod signaling;

use call_engine::CallEngine;
use config::EngineConfig;
use directory::ParticipantDirectory;
use signaling::{SignalingEvent, SignalingSource, SimulatedSignaling};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

// ============================================================================
// LOGGING
// ============================================================================

/// Initialisiert das Logging (`RUST_LOG` überschreibt die Defaults)
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("appointment_call=debug"));

    // Ein zweiter Aufruf (z.B. in Tests) ist kein Fehler
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

// ============================================================================
// APPLICATION STATE
// ============================================================================

/// Verdrahtet Verzeichnis, Engine und Signaling
pub struct AppState {
    pub config: EngineConfig,
    pub directory: Arc<ParticipantDirectory>,
    pub engine: CallEngine,
    pub signaling: SimulatedSignaling,
    engine_task: JoinHandle<()>,
    signaling_task: JoinHandle<()>,
}

impl AppState {
    /// Startet Engine und Signaling-Bridge
    ///
    /// Muss innerhalb einer Tokio-Runtime aufgerufen werden.
    pub fn start(config: EngineConfig, directory: ParticipantDirectory) -> Self {
        tracing::info!(
            participants = directory.len(),
            policy = ?config.presence_policy,
            "Starting call engine"
        );

        let directory = Arc::new(directory);
        let (engine, engine_task) = CallEngine::spawn(config.clone(), Some(Arc::clone(&directory)));
        let signaling = SimulatedSignaling::new();
        let signaling_task =
            spawn_signaling_bridge(&signaling, engine.clone(), Arc::clone(&directory));

        Self {
            config,
            directory,
            engine,
            signaling,
            engine_task,
            signaling_task,
        }
    }

    /// Stoppt Bridge und Engine und wartet auf den Engine-Task
    pub async fn shutdown(self) {
        self.signaling_task.abort();
        self.engine.shutdown();
        if let Err(e) = self.engine_task.await {
            tracing::error!("Call engine task failed: {}", e);
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("engine", &self.engine)
            .field("participants", &self.directory.len())
            .finish()
    }
}

// ============================================================================
// EVENT HANDLER
// ============================================================================

/// Leitet Signaling-Events in Engine und Verzeichnis weiter
pub fn spawn_signaling_bridge(
    source: &impl SignalingSource,
    engine: CallEngine,
    directory: Arc<ParticipantDirectory>,
) -> JoinHandle<()> {
    let mut event_rx = source.subscribe();

    tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event) => handle_signaling_event(event, &engine, &directory),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Signaling bridge lagged, {} events skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::debug!("Signaling bridge stopped");
    })
}

/// Verarbeitet ein einzelnes Signaling-Event
pub fn handle_signaling_event(
    event: SignalingEvent,
    engine: &CallEngine,
    directory: &ParticipantDirectory,
) {
    let result = match event {
        SignalingEvent::IncomingCall {
            caller,
            appointment_id,
        } => {
            tracing::info!("Incoming call signal from {} ({})", caller.name, caller.id);
            engine.inject_incoming_call(caller, appointment_id)
        }

        SignalingEvent::RemoteLeft => {
            tracing::info!("Remote participant left");
            engine.inject_remote_left()
        }

        SignalingEvent::PresenceChanged {
            participant_id,
            is_online,
        } => {
            tracing::info!(
                "Participant {} is now {}",
                participant_id,
                if is_online { "online" } else { "offline" }
            );
            if let Err(e) = directory.set_online_status(&participant_id, is_online) {
                tracing::warn!("Presence update ignored: {}", e);
            }
            Ok(())
        }
    };

    if let Err(e) = result {
        tracing::error!("Failed to forward signaling event: {}", e);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use call_engine::CallStatus;
    use directory::{Participant, Role};
    use std::time::Duration;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn directory() -> ParticipantDirectory {
        ParticipantDirectory::from_participants([
            Participant::new("p1", "Ahmed", Role::Officer),
            Participant::new("c1", "Dana", Role::Student).with_online(false),
        ])
    }

    #[tokio::test(start_paused = true)]
    async fn test_signaling_drives_engine_and_directory() {
        let app = AppState::start(EngineConfig::default(), directory());

        app.signaling.set_presence("c1", true);
        settle().await;
        assert_eq!(app.directory.presence("c1"), Some(true));

        let dana = app.directory.get("c1").unwrap();
        app.signaling
            .inject_incoming_call(dana, Some("appt-3".to_string()));
        settle().await;
        assert_eq!(app.engine.state(), CallStatus::Ringing);

        app.engine.accept_call().unwrap();
        settle().await;
        tokio::time::advance(Duration::from_millis(1501)).await;
        settle().await;
        assert_eq!(app.engine.state(), CallStatus::Connected);

        app.signaling.inject_remote_left();
        settle().await;
        assert_eq!(app.engine.state(), CallStatus::Ended);

        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_presence_is_ignored() {
        let app = AppState::start(EngineConfig::default(), directory());
        handle_signaling_event(
            SignalingEvent::PresenceChanged {
                participant_id: "ghost".to_string(),
                is_online: true,
            },
            &app.engine,
            &app.directory,
        );
        assert_eq!(app.directory.len(), 2);
        app.shutdown().await;
    }
}
