use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use super::config::RaftConfig;
use super::RaftEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    ElectionTimeout,
    HeartbeatDue,
}

/// A timer signal tagged with the generation that scheduled it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFiring {
    pub kind: TimerKind,
    pub generation: u64,
}

/// Draws an election timeout uniformly from `[min, max]`, at millisecond
/// granularity. Redrawn on every restart so competing candidates drift apart.
pub fn random_election_timeout<R: Rng + ?Sized>(rng: &mut R, min: Duration, max: Duration) -> Duration {
    let min_ms = min.as_millis() as u64;
    let max_ms = (max.as_millis() as u64).max(min_ms);
    Duration::from_millis(rng.random_range(min_ms..=max_ms))
}

/// The single logical timer of a node.
///
/// At most one firing is scheduled at a time. Every (re)schedule or cancel
/// bumps the generation, and the runtime drops firings whose generation is no
/// longer current, so a firing that was already queued when it got superseded
/// never reaches the state machine.
pub struct ElectionTimer {
    election_min: Duration,
    election_max: Duration,
    heartbeat: Duration,
    generation: u64,
    pending: Option<JoinHandle<()>>,
    // Weak so a pending firing never keeps the runtime's queue open.
    events: mpsc::WeakSender<RaftEvent>,
}

impl ElectionTimer {
    pub fn new(config: &RaftConfig, events: &mpsc::Sender<RaftEvent>) -> Self {
        let (election_min, election_max) = config.election_timeout_range();
        Self {
            election_min,
            election_max,
            heartbeat: config.heartbeat(),
            generation: 0,
            pending: None,
            events: events.downgrade(),
        }
    }

    /// Replaces whatever is scheduled with a freshly randomized election
    /// timeout. Returns the chosen delay.
    pub fn restart_election(&mut self) -> Duration {
        let delay = random_election_timeout(&mut rand::rng(), self.election_min, self.election_max);
        self.schedule(TimerKind::ElectionTimeout, delay);
        delay
    }

    /// Replaces whatever is scheduled with the next heartbeat.
    pub fn schedule_heartbeat(&mut self) {
        self.schedule(TimerKind::HeartbeatDue, self.heartbeat);
    }

    pub fn cancel(&mut self) {
        self.generation += 1;
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    pub fn is_current(&self, firing: &TimerFiring) -> bool {
        firing.generation == self.generation
    }

    fn schedule(&mut self, kind: TimerKind, delay: Duration) {
        self.cancel();

        let firing = TimerFiring {
            kind,
            generation: self.generation,
        };
        let events = self.events.clone();
        self.pending = Some(tokio::spawn(async move {
            sleep(delay).await;
            if let Some(events) = events.upgrade() {
                let _ = events.send(RaftEvent::Timer(firing)).await;
            }
        }));
    }
}

impl Drop for ElectionTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}
