//! Poll cadence.

use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

/// Time between scheduler polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Source of "poll again now" events.
///
/// The monitor and the sequential strategy only ever wait through a
/// ticker, so tests can drive them without real delays.
pub trait Ticker: Send {
    fn tick(&mut self) -> impl Future<Output = ()> + Send;
}

/// Ticker backed by a tokio interval. The first tick fires one period
/// after creation.
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let mut interval = interval_at(Instant::now() + period, period);
        // A slow poll pushes the next one back instead of bursting.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

impl Default for IntervalTicker {
    fn default() -> Self {
        Self::new(POLL_INTERVAL)
    }
}

impl Ticker for IntervalTicker {
    async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

/// Ticker that never waits. Counts how often it was asked.
#[derive(Debug, Default)]
pub struct ImmediateTicker {
    ticks: usize,
}

impl ImmediateTicker {
    pub fn ticks(&self) -> usize {
        self.ticks
    }
}

impl Ticker for ImmediateTicker {
    async fn tick(&mut self) {
        self.ticks += 1;
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_interval_ticker_waits_a_period() {
        let period = Duration::from_millis(20);
        let mut ticker = IntervalTicker::new(period);
        let start = Instant::now();
        ticker.tick().await;
        assert!(start.elapsed() >= period);
    }

    #[tokio::test]
    async fn test_immediate_ticker_counts() {
        let mut ticker = ImmediateTicker::default();
        ticker.tick().await;
        ticker.tick().await;
        assert_eq!(ticker.ticks(), 2);
    }
}
