//! Named, individually cancelable timers for reactor loops.
//!
//! A reactor keeps one `TimerSlot` per timer purpose (watchdog, reconnect,
//! stall, ...). Scheduling a slot replaces whatever was armed there, so a
//! purpose never has more than one live timer. Slots are polled from a
//! `tokio::select!` branch through [`TimerSlot::fired`], which stays pending
//! forever while the slot is disarmed.

use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::{sleep, Instant, Sleep};
use tracing::trace;

#[derive(Debug)]
pub struct TimerSlot {
    name: &'static str,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl TimerSlot {
    pub fn new(name: &'static str) -> Self {
        Self { name, sleep: None }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Arm the slot, replacing any timer already armed.
    pub fn schedule(&mut self, after: Duration) {
        trace!(timer = self.name, delay_ms = after.as_millis() as u64, "timer armed");
        self.sleep = Some(Box::pin(sleep(after)));
    }

    pub fn cancel(&mut self) {
        if self.sleep.take().is_some() {
            trace!(timer = self.name, "timer cancelled");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.sleep.as_ref().map(|s| s.deadline())
    }

    /// Resolves once when the armed timer expires, then disarms the slot.
    pub async fn fired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.sleep = None;
            }
            None => pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_then_disarms() {
        let mut slot = TimerSlot::new("watchdog");
        slot.schedule(Duration::from_secs(8));
        assert!(slot.is_armed());

        let started = Instant::now();
        slot.fired().await;
        assert_eq!(started.elapsed(), Duration::from_secs(8));
        assert!(!slot.is_armed());

        // Disarmed slot never resolves
        assert!(timeout(Duration::from_secs(60), slot.fired()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_replaces_previous() {
        let mut slot = TimerSlot::new("reconnect");
        slot.schedule(Duration::from_secs(1));
        slot.schedule(Duration::from_secs(5));

        let started = Instant::now();
        slot.fired().await;
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let mut slot = TimerSlot::new("stall");
        slot.schedule(Duration::from_millis(10));
        slot.cancel();
        assert!(slot.deadline().is_none());
        assert!(timeout(Duration::from_secs(1), slot.fired()).await.is_err());
    }
}
