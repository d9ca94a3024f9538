//! Round-trip latency estimation from ping/pong exchanges

use std::time::{Duration, Instant};

/// Smooths one-way latency estimates with an exponential moving average
///
/// Ping timestamps are seconds since the monitor was created, so only the
/// requesting side ever interprets them.
#[derive(Debug)]
pub struct LatencyMonitor {
    epoch: Instant,
    ema_alpha: f64,
    ping_interval: Duration,
    smoothed: Option<f64>,
    samples: u64,
    last_send: Option<Instant>,
    last_pong_at: Option<Instant>,
}

impl LatencyMonitor {
    pub fn new(ema_alpha: f64, ping_interval: Duration) -> Self {
        Self {
            epoch: Instant::now(),
            ema_alpha: ema_alpha.clamp(0.0, 1.0),
            ping_interval,
            smoothed: None,
            samples: 0,
            last_send: None,
            last_pong_at: None,
        }
    }

    /// Timestamp to embed in a ping request
    pub fn timestamp(&self, now: Instant) -> f64 {
        now.saturating_duration_since(self.epoch).as_secs_f64()
    }

    /// Returns the timestamp for a new ping if the rate limit allows one
    pub fn poll_ping(&mut self, now: Instant) -> Option<f64> {
        if let Some(last) = self.last_send {
            if now.saturating_duration_since(last) < self.ping_interval {
                return None;
            }
        }
        self.last_send = Some(now);
        Some(self.timestamp(now))
    }

    /// Folds the echo of a ping sent at `time_sent` into the estimate
    pub fn on_pong(&mut self, time_sent: f64, now: Instant) -> f64 {
        let rtt = (self.timestamp(now) - time_sent).max(0.0);
        let instant = rtt / 2.0;

        let smoothed = match self.smoothed {
            None => instant,
            Some(previous) => self.ema_alpha * instant + (1.0 - self.ema_alpha) * previous,
        };
        self.smoothed = Some(smoothed);
        self.samples += 1;
        self.last_pong_at = Some(now);
        smoothed
    }

    /// Smoothed one-way latency in seconds, 0 before the first sample
    pub fn ping_rate(&self) -> f64 {
        self.smoothed.unwrap_or(0.0)
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn last_pong_at(&self) -> Option<Instant> {
        self.last_pong_at
    }

    pub fn reset(&mut self) {
        self.smoothed = None;
        self.samples = 0;
        self.last_send = None;
        self.last_pong_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn monitor() -> LatencyMonitor {
        LatencyMonitor::new(0.2, Duration::from_secs(1))
    }

    #[test]
    fn test_first_sample_initializes_estimate() {
        let mut monitor = monitor();
        let start = Instant::now();
        let sent = monitor.timestamp(start);

        let smoothed = monitor.on_pong(sent, start + Duration::from_millis(100));
        assert_approx_eq!(smoothed, 0.05, 1e-6);
        assert_eq!(monitor.samples(), 1);
        assert_eq!(
            monitor.last_pong_at(),
            Some(start + Duration::from_millis(100))
        );
    }

    #[test]
    fn test_ema_update() {
        let mut monitor = monitor();
        let start = Instant::now();
        let sent = monitor.timestamp(start);
        monitor.on_pong(sent, start + Duration::from_millis(100));

        let sent = monitor.timestamp(start + Duration::from_secs(1));
        let smoothed = monitor.on_pong(sent, start + Duration::from_millis(1300));
        // 0.2 * 0.15 + 0.8 * 0.05
        assert_approx_eq!(smoothed, 0.07, 1e-6);
    }

    #[test]
    fn test_converges_monotonically_to_constant_latency() {
        let mut monitor = monitor();
        let mut now = Instant::now();

        let sent = monitor.timestamp(now);
        now += Duration::from_millis(20);
        monitor.on_pong(sent, now);

        let mut previous_gap = f64::MAX;
        for _ in 0..60 {
            let sent = monitor.timestamp(now);
            now += Duration::from_millis(200);
            let smoothed = monitor.on_pong(sent, now);
            let gap = (0.1 - smoothed).abs();
            assert!(gap <= previous_gap);
            previous_gap = gap;
        }
        assert_approx_eq!(monitor.ping_rate(), 0.1, 1e-3);
    }

    #[test]
    fn test_ping_rate_limit() {
        let mut monitor = monitor();
        let start = Instant::now();

        assert!(monitor.poll_ping(start).is_some());
        assert!(monitor.poll_ping(start + Duration::from_millis(500)).is_none());
        assert!(monitor.poll_ping(start + Duration::from_millis(1000)).is_some());
    }

    #[test]
    fn test_reset_clears_estimate() {
        let mut monitor = monitor();
        let start = Instant::now();
        let sent = monitor.timestamp(start);
        monitor.on_pong(sent, start + Duration::from_millis(40));

        monitor.reset();
        assert_eq!(monitor.ping_rate(), 0.0);
        assert_eq!(monitor.samples(), 0);
        assert!(monitor.poll_ping(start).is_some());
    }
}
