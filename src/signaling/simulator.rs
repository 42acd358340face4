//! Simuliertes Signaling
//!
//! Ersetzt die Transportschicht: Ereignisse werden per Methode eingespeist
//! und über einen Broadcast-Channel verteilt. `ring_randomly` ahmt einen
//! Anrufer nach, der sich nach einer Wartezeit meldet.

use super::messages::SignalingEvent;
use crate::directory::{Participant, ParticipantDirectory};
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Abstrakte Quelle für Signaling-Ereignisse
pub trait SignalingSource {
    fn subscribe(&self) -> broadcast::Receiver<SignalingEvent>;
}

#[derive(Debug, Clone)]
pub struct SimulatedSignaling {
    event_tx: broadcast::Sender<SignalingEvent>,
}

impl SimulatedSignaling {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self { event_tx }
    }

    pub fn inject_incoming_call(&self, caller: Participant, appointment_id: Option<String>) {
        self.emit(SignalingEvent::IncomingCall {
            caller,
            appointment_id,
        });
    }

    pub fn inject_remote_left(&self) {
        self.emit(SignalingEvent::RemoteLeft);
    }

    pub fn set_presence(&self, participant_id: impl Into<String>, is_online: bool) {
        self.emit(SignalingEvent::PresenceChanged {
            participant_id: participant_id.into(),
            is_online,
        });
    }

    /// Lässt nach `delay` einen zufälligen Online-Teilnehmer anrufen
    ///
    /// Der Task liefert den gewählten Anrufer, oder `None` wenn niemand
    /// online war.
    pub fn ring_randomly(
        &self,
        directory: Arc<ParticipantDirectory>,
        delay: Duration,
    ) -> JoinHandle<Option<Participant>> {
        let signaling = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let caller = directory
                .online()
                .choose(&mut rand::thread_rng())
                .cloned();

            match &caller {
                Some(caller) => {
                    tracing::debug!("Simulating incoming call from {}", caller.name);
                    signaling.inject_incoming_call(caller.clone(), None);
                }
                None => tracing::debug!("Nobody online to simulate a call"),
            }
            caller
        })
    }

    fn emit(&self, event: SignalingEvent) {
        if self.event_tx.send(event).is_err() {
            tracing::debug!("Signaling event dropped: no subscribers");
        }
    }
}

impl Default for SimulatedSignaling {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalingSource for SimulatedSignaling {
    fn subscribe(&self) -> broadcast::Receiver<SignalingEvent> {
        self.event_tx.subscribe()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::Role;

    #[test]
    fn test_injected_events_reach_subscriber() {
        let signaling = SimulatedSignaling::new();
        let mut rx = signaling.subscribe();

        signaling.set_presence("p1", true);
        signaling.inject_remote_left();

        assert!(matches!(
            rx.try_recv().unwrap(),
            SignalingEvent::PresenceChanged { is_online: true, .. }
        ));
        assert_eq!(rx.try_recv().unwrap(), SignalingEvent::RemoteLeft);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ring_randomly_picks_online_participant() {
        let directory = Arc::new(ParticipantDirectory::from_participants([
            Participant::new("p1", "Ahmed", Role::Officer).with_online(false),
            Participant::new("c1", "Dana", Role::Student),
        ]));
        let signaling = SimulatedSignaling::new();
        let mut rx = signaling.subscribe();

        let caller = signaling
            .ring_randomly(directory, Duration::from_secs(3))
            .await
            .unwrap();

        assert_eq!(caller.unwrap().name, "Dana");
        match rx.try_recv().unwrap() {
            SignalingEvent::IncomingCall { caller, .. } => assert_eq!(caller.id, "c1"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ring_randomly_with_nobody_online() {
        let directory = Arc::new(ParticipantDirectory::new());
        let signaling = SimulatedSignaling::new();

        let caller = signaling
            .ring_randomly(directory, Duration::ZERO)
            .await
            .unwrap();
        assert!(caller.is_none());
    }
}
