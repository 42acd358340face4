//! Notifications - Ereignisse für die Toast-Schicht der UI
//!
//! Die Call-Engine meldet jedes sichtbare Ereignis genau einmal an einen
//! `NotificationSink`. Die Senke ist aus Sicht der Engine write-only.

use serde::Serialize;
use tokio::sync::broadcast;

// ============================================================================
// NOTIFICATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Info,
    Warning,
    Error,
}

/// Art des Ereignisses, damit die UI nicht am Text parsen muss
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Calling,
    IncomingCall,
    Accepted,
    Connected,
    Rejected,
    Missed,
    Ended,
    RemoteLeft,
    AlreadyInCall,
    ParticipantOffline,
    MediaToggled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub severity: Severity,
    pub message: String,
}

impl Notification {
    pub fn new(kind: NotificationKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
        }
    }

    pub fn info(kind: NotificationKind, message: impl Into<String>) -> Self {
        Self::new(kind, Severity::Info, message)
    }
}

impl std::fmt::Display for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            Severity::Success => "ok",
            Severity::Info => "info",
            Severity::Warning => "warn",
            Severity::Error => "error",
        };
        write!(f, "[{}] {}", tag, self.message)
    }
}

// ============================================================================
// SINKS
// ============================================================================

/// Empfänger für Notifications (fire-and-forget)
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Verteilt Notifications an beliebig viele Subscriber
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Gibt einen Notification-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(100)
    }
}

impl NotificationSink for BroadcastNotifier {
    fn notify(&self, notification: Notification) {
        // Ohne Subscriber geht die Notification verloren
        let _ = self.tx.send(notification);
    }
}

/// Schreibt Notifications nur ins Log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn notify(&self, notification: Notification) {
        match notification.severity {
            Severity::Error => tracing::error!("{}", notification.message),
            Severity::Warning => tracing::warn!("{}", notification.message),
            Severity::Success | Severity::Info => tracing::info!("{}", notification.message),
        }
    }
}

/// Merkt sich alle Notifications (für Tests)
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    seen: std::sync::Arc<parking_lot::Mutex<Vec<Notification>>>,
}

#[cfg(test)]
impl RecordingNotifier {
    pub fn all(&self) -> Vec<Notification> {
        self.seen.lock().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.seen.lock().iter().map(|n| n.message.clone()).collect()
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        self.seen.lock().iter().filter(|n| n.kind == kind).count()
    }

    pub fn last(&self) -> Option<Notification> {
        self.seen.lock().last().cloned()
    }
}

#[cfg(test)]
impl NotificationSink for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.seen.lock().push(notification);
    }
}

// ============================================================================
// TESTS
// ============================================================================
