//! Timer Facility
//!
//! Verzögerte Übergänge (Verbindungsaufbau, Klingel-Timeout, Cooldown) laufen
//! über einen `Scheduler`. Jeder Timer trägt die `CallId`, für die er geplant
//! wurde; die State Machine prüft diese Identität beim Auslösen.
//!
//! Zwei Implementierungen:
//! - `TokioScheduler`: echte Zeit, liefert in die Mailbox der Engine
//! - `ManualScheduler`: virtuelle Uhr für deterministische Hosts und Tests

use super::types::CallId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

// ============================================================================
// TIMER TYPES
// ============================================================================

/// Opaque Handle eines geplanten Timers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    ConnectLatency,
    RingTimeout,
    Cooldown,
}

/// Was beim Auslösen passieren soll, getaggt mit der `CallId`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timer {
    pub kind: TimerKind,
    pub call_id: CallId,
}

/// Ein ausgelöster Timer, zurück an die State Machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFired {
    pub handle: TimerHandle,
    pub timer: Timer,
}

pub trait Scheduler {
    fn schedule(&mut self, delay: Duration, timer: Timer) -> TimerHandle;

    /// Unbekannte oder bereits ausgelöste Handles werden ignoriert
    fn cancel(&mut self, handle: TimerHandle);
}

// ============================================================================
// TOKIO SCHEDULER
// ============================================================================

/// Plant Timer als Tokio-Tasks
///
/// Ausgelöste Timer werden als `M` in die Mailbox geschrieben. Der Scheduler
/// hält nur einen schwachen Sender, damit die Mailbox schließt, sobald alle
/// Engine-Handles weg sind.
pub struct TokioScheduler<M> {
    next_id: u64,
    mailbox: mpsc::WeakUnboundedSender<M>,
    tasks: HashMap<TimerHandle, JoinHandle<()>>,
}

impl<M> TokioScheduler<M>
where
    M: From<TimerFired> + Send + 'static,
{
    pub fn new(mailbox: mpsc::WeakUnboundedSender<M>) -> Self {
        Self {
            next_id: 0,
            mailbox,
            tasks: HashMap::new(),
        }
    }

    /// Anzahl noch nicht abgeschlossener Timer-Tasks
    pub fn pending(&self) -> usize {
        self.tasks.values().filter(|t| !t.is_finished()).count()
    }
}

impl<M> Scheduler for TokioScheduler<M>
where
    M: From<TimerFired> + Send + 'static,
{
    fn schedule(&mut self, delay: Duration, timer: Timer) -> TimerHandle {
        // Abgelaufene Tasks aufräumen, damit die Tabelle nicht wächst
        self.tasks.retain(|_, task| !task.is_finished());

        self.next_id += 1;
        let handle = TimerHandle(self.next_id);
        let mailbox = self.mailbox.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = mailbox.upgrade() {
                let _ = tx.send(M::from(TimerFired { handle, timer }));
            }
        });

        self.tasks.insert(handle, task);
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        if let Some(task) = self.tasks.remove(&handle) {
            task.abort();
        }
    }
}

impl<M> Drop for TokioScheduler<M> {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

impl<M> std::fmt::Debug for TokioScheduler<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioScheduler")
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

// ============================================================================
// MANUAL SCHEDULER
// ============================================================================

#[derive(Debug, Default)]
struct ManualClock {
    now: Duration,
    next_id: u64,
    pending: Vec<(Duration, TimerHandle, Timer)>,
}

/// Virtuelle Uhr: Timer lösen nur über `advance` aus
///
/// Klone teilen sich dieselbe Uhr, so kann ein Host die Zeit vorstellen,
/// während die State Machine den Scheduler besitzt.
#[derive(Debug, Clone, Default)]
pub struct ManualScheduler {
    clock: Arc<Mutex<ManualClock>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aktuelle virtuelle Zeit seit Start
    pub fn now(&self) -> Duration {
        self.clock.lock().now
    }

    pub fn pending(&self) -> usize {
        self.clock.lock().pending.len()
    }

    /// Stellt die Uhr vor und gibt alle fälligen Timer in Fälligkeitsreihenfolge zurück
    pub fn advance(&self, by: Duration) -> Vec<TimerFired> {
        let mut clock = self.clock.lock();
        clock.now += by;
        let now = clock.now;

        let mut due: Vec<(Duration, TimerHandle, Timer)> = Vec::new();
        let mut i = 0;
        while i < clock.pending.len() {
            if clock.pending[i].0 <= now {
                due.push(clock.pending.swap_remove(i));
            } else {
                i += 1;
            }
        }
        due.sort_by_key(|(at, handle, _)| (*at, *handle));

        due.into_iter()
            .map(|(_, handle, timer)| TimerFired { handle, timer })
            .collect()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&mut self, delay: Duration, timer: Timer) -> TimerHandle {
        let mut clock = self.clock.lock();
        clock.next_id += 1;
        let handle = TimerHandle(clock.next_id);
        let due = clock.now + delay;
        clock.pending.push((due, handle, timer));
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.clock.lock().pending.retain(|(_, h, _)| *h != handle);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn timer(kind: TimerKind, id: &str) -> Timer {
        Timer {
            kind,
            call_id: CallId::from(id),
        }
    }

    #[test]
    fn test_manual_fires_in_due_order() {
        let clock = ManualScheduler::new();
        let mut scheduler = clock.clone();

        scheduler.schedule(Duration::from_millis(300), timer(TimerKind::Cooldown, "b"));
        scheduler.schedule(Duration::from_millis(100), timer(TimerKind::RingTimeout, "a"));

        assert!(clock.advance(Duration::from_millis(50)).is_empty());

        let fired = clock.advance(Duration::from_millis(500));
        let ids: Vec<_> = fired.iter().map(|f| f.timer.call_id.to_string()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(clock.pending(), 0);
        assert_eq!(clock.now(), Duration::from_millis(550));
    }

    #[test]
    fn test_manual_cancel() {
        let clock = ManualScheduler::new();
        let mut scheduler = clock.clone();

        let handle = scheduler.schedule(Duration::from_millis(10), timer(TimerKind::Cooldown, "x"));
        scheduler.cancel(handle);
        scheduler.cancel(handle);

        assert!(clock.advance(Duration::from_secs(1)).is_empty());
    }

    #[derive(Debug)]
    struct Fired(TimerFired);

    impl From<TimerFired> for Fired {
        fn from(fired: TimerFired) -> Self {
            Fired(fired)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_scheduler_delivers_and_cancels() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Fired>();
        let mut scheduler = TokioScheduler::new(tx.downgrade());

        let kept = scheduler.schedule(Duration::from_millis(100), timer(TimerKind::RingTimeout, "a"));
        let dropped = scheduler.schedule(Duration::from_millis(50), timer(TimerKind::Cooldown, "b"));
        scheduler.cancel(dropped);

        tokio::time::sleep(Duration::from_millis(150)).await;

        let Fired(fired) = rx.try_recv().unwrap();
        assert_eq!(fired.handle, kept);
        assert_eq!(fired.timer.call_id, CallId::from("a"));
        assert!(rx.try_recv().is_err());
        assert_eq!(scheduler.pending(), 0);
    }
}
