//! Resource reclaimer
//!
//! Tears down finished item players off the control timeline. Each scheduled
//! player gets its own task that calls the backend's release until it answers
//! `Done`, sleeping with exponential backoff between `Busy` answers. The
//! control timeline never waits on a teardown.

use super::item_player::ItemPlayer;
use crate::backend::ReleaseStatus;
use crate::config::ReclaimConfig;
use seqcast_common::events::{EventBus, SeqEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Backoff between release attempts
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    initial: Duration,
    max: Duration,
    warn_after: u32,
}

impl RetryPolicy {
    pub fn new(config: &ReclaimConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.initial_backoff_ms),
            max: Duration::from_millis(config.max_backoff_ms),
            warn_after: config.warn_after_attempts.max(1),
        }
    }

    /// Delay after the `attempt`-th `Busy` answer (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max)
            .min(self.max)
    }

    /// Whether the `attempt`-th `Busy` answer deserves a warning
    pub fn should_warn(&self, attempt: u32) -> bool {
        attempt >= self.warn_after && attempt % self.warn_after == 0
    }
}

/// Spawns and tracks teardown tasks
#[derive(Clone)]
pub struct Reclaimer {
    policy: RetryPolicy,
    events: Arc<EventBus>,
    in_flight: Arc<watch::Sender<usize>>,
}

impl Reclaimer {
    pub fn new(config: &ReclaimConfig, events: Arc<EventBus>) -> Self {
        let (in_flight, _) = watch::channel(0usize);
        Self {
            policy: RetryPolicy::new(config),
            events,
            in_flight: Arc::new(in_flight),
        }
    }

    /// Hand `player` over for teardown; returns immediately
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(&self, player: ItemPlayer) {
        self.in_flight.send_modify(|n| *n += 1);

        let policy = self.policy.clone();
        let events = Arc::clone(&self.events);
        let in_flight = Arc::clone(&self.in_flight);

        tokio::spawn(async move {
            let item_id = player.id();
            let attempts = retire(player, &policy).await;
            debug!("Item {} retired after {} attempt(s)", item_id, attempts);

            events.emit_lossy(SeqEvent::ItemRetired {
                item_id,
                attempts,
                timestamp: chrono::Utc::now(),
            });
            in_flight.send_modify(|n| *n = n.saturating_sub(1));
        });
    }

    /// Teardowns not yet finished
    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Resolve once every scheduled teardown has finished
    pub async fn wait_idle(&self) {
        let mut rx = self.in_flight.subscribe();
        // Sender is owned by self, so the channel cannot close here
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

/// Release until done; returns the number of attempts
async fn retire(mut player: ItemPlayer, policy: &RetryPolicy) -> u32 {
    let mut attempt = 0u32;
    loop {
        attempt = attempt.saturating_add(1);
        match player.release_once() {
            ReleaseStatus::Done => return attempt,
            ReleaseStatus::Busy => {
                if policy.should_warn(attempt) {
                    warn!(
                        "Item {} ({}) still busy after {} release attempts",
                        player.id(),
                        player.entry(),
                        attempt
                    );
                }
                tokio::time::sleep(policy.delay_for(attempt)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(initial: u64, max: u64, warn_after: u32) -> RetryPolicy {
        RetryPolicy::new(&ReclaimConfig {
            initial_backoff_ms: initial,
            max_backoff_ms: max,
            warn_after_attempts: warn_after,
        })
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let p = policy(10, 100, 50);
        assert_eq!(p.delay_for(1), Duration::from_millis(10));
        assert_eq!(p.delay_for(2), Duration::from_millis(20));
        assert_eq!(p.delay_for(3), Duration::from_millis(40));
        assert_eq!(p.delay_for(4), Duration::from_millis(80));
        assert_eq!(p.delay_for(5), Duration::from_millis(100));
        assert_eq!(p.delay_for(1000), Duration::from_millis(100));
    }

    #[test]
    fn test_warning_cadence() {
        let p = policy(10, 100, 3);
        let warned: Vec<u32> = (1..=10).filter(|a| p.should_warn(*a)).collect();
        assert_eq!(warned, vec![3, 6, 9]);
    }

    #[tokio::test]
    async fn test_wait_idle_with_nothing_scheduled() {
        let reclaimer = Reclaimer::new(&ReclaimConfig::default(), Arc::new(EventBus::new(8)));
        assert_eq!(reclaimer.in_flight(), 0);
        reclaimer.wait_idle().await;
    }
}
