//! Single-slot recurring timer.
//!
//! A [`TimerSlot`] holds at most one armed interval. Arming always replaces
//! the previous interval, so flapping connections never stack timers.

use std::future;
use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::debug;

#[derive(Debug)]
pub struct TimerSlot {
    name: &'static str,
    interval: Option<Interval>,
}

impl TimerSlot {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            interval: None,
        }
    }

    /// Arm (or re-arm) the timer; the first tick fires one full period from now
    pub fn arm(&mut self, period: Duration) {
        if self.interval.take().is_some() {
            debug!("Replacing armed {} timer", self.name);
        }
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.interval = Some(interval);
        debug!("Armed {} timer every {:?}", self.name, period);
    }

    /// Cancel the timer; returns whether one was armed
    pub fn cancel(&mut self) -> bool {
        let was_armed = self.interval.take().is_some();
        if was_armed {
            debug!("Cancelled {} timer", self.name);
        }
        was_armed
    }

    pub fn is_armed(&self) -> bool {
        self.interval.is_some()
    }

    /// Wait for the next tick; never completes while the slot is empty
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => future::pending::<()>().await,
        }
    }
}
