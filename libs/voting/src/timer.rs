//! Session-scoped round countdown

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::debug;

use crate::broadcaster::Broadcaster;
use crate::events::SessionEvent;
use crate::models::Round;

/// A running countdown for one round.
///
/// Publishes `timerUpdate` every tick and runs the expiry callback once the
/// countdown reaches zero. Dropping the timer cancels it, so a timer owned
/// by a session's runtime can never outlive it.
pub struct RoundTimer {
    handle: JoinHandle<()>,
}

impl RoundTimer {
    pub fn start<F, Fut>(
        session_id: i64,
        round: Round,
        duration: Duration,
        tick: Duration,
        broadcaster: Broadcaster,
        on_expire: F,
    ) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let deadline = Instant::now() + duration;

        let handle = tokio::spawn(async move {
            loop {
                let left = deadline.saturating_duration_since(Instant::now());
                broadcaster.publish(
                    session_id,
                    SessionEvent::TimerUpdate {
                        session_id,
                        round,
                        millis_left: left.as_millis() as u64,
                    },
                );

                if left.is_zero() {
                    break;
                }
                sleep(tick.min(left)).await;
            }

            debug!("Round {} timer of session {} expired", round, session_id);

            // The callback replaces this timer, which aborts this task, so
            // it runs detached.
            tokio::spawn(on_expire());
        });

        Self { handle }
    }
}

impl Drop for RoundTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_timer_ticks_then_expires() {
        let hub = Broadcaster::new(64);
        let mut events = hub.subscribe(1);
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        let _timer = RoundTimer::start(
            1,
            Round::One,
            Duration::from_secs(3),
            Duration::from_secs(1),
            hub.clone(),
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        let mut left = Vec::new();
        while let Some(SessionEvent::TimerUpdate { millis_left, .. }) = events.recv().await {
            left.push(millis_left);
            if millis_left == 0 {
                break;
            }
        }
        assert_eq!(left, vec![3000, 2000, 1000, 0]);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_timer_never_fires() {
        let hub = Broadcaster::new(64);
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        let timer = RoundTimer::start(
            1,
            Round::Two,
            Duration::from_secs(2),
            Duration::from_secs(1),
            hub,
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );
        drop(timer);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
