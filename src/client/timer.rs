//! Single-shot timers owned by the client task

use std::future::pending;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};

/// Re-armable deadline
///
/// `expired()` pends forever while disarmed, so the timer can sit in a
/// `select!` branch unconditionally. Arming again replaces the deadline.
#[derive(Debug, Default)]
pub(crate) struct Timer {
    deadline: Option<Instant>,
}

impl Timer {
    pub fn arm(&mut self, after: Duration) {
        self.deadline = Some(Instant::now() + after);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub async fn expired(&self) {
        match self.deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => pending().await,
        }
    }
}

/// The named timers of one client
#[derive(Debug, Default)]
pub(crate) struct Timers {
    pub connect: Timer,
    pub disconnect: Timer,
    pub keep_alive: Timer,
    pub pingresp: Timer,
}

impl Timers {
    pub fn cancel_all(&mut self) {
        self.connect.cancel();
        self.disconnect.cancel();
        self.keep_alive.cancel();
        self.pingresp.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_deadline() {
        let mut timer = Timer::default();
        timer.arm(Duration::from_secs(5));
        let start = Instant::now();
        timer.expired().await;
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_deadline() {
        let mut timer = Timer::default();
        timer.arm(Duration::from_secs(1));
        timer.arm(Duration::from_secs(10));
        let start = Instant::now();
        timer.expired().await;
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarmed_never_fires() {
        let mut timer = Timer::default();
        timer.arm(Duration::from_secs(1));
        timer.cancel();
        assert!(!timer.is_armed());
        let fired = tokio::time::timeout(Duration::from_secs(60), timer.expired()).await;
        assert!(fired.is_err());
    }
}
