//! Transfer throughput bookkeeping.
//!
//! Each peer session owns one counter per direction. A counter is a
//! cumulative byte total plus time-ordered samples of that total, so that
//! "how many bytes since T" can be answered for any recent T.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

/// How long samples are kept around. Older samples are pruned, except for
/// the youngest of them, which anchors queries reaching further back.
const SAMPLE_RETENTION: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct ThruputCounter {
    total: u64,
    /// `(time, cumulative total at that time)`, oldest first.
    samples: VecDeque<(Instant, u64)>,
}

impl ThruputCounter {
    pub fn new(now: Instant) -> Self {
        let mut samples = VecDeque::new();
        samples.push_back((now, 0));
        Self { total: 0, samples }
    }

    /// Records `bytes` transferred at `now`.
    pub fn record(&mut self, bytes: u64, now: Instant) {
        self.total += bytes;
        self.samples.push_back((now, self.total));
        self.prune(now);
    }

    /// All bytes ever recorded.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Bytes transferred after `since`.
    ///
    /// Scans back to the most recent sample recorded before `since` and
    /// returns the growth of the total after it. If there is no sample that
    /// old, everything counts.
    pub fn since(&self, since: Instant) -> u64 {
        match self.samples.iter().rev().find(|(at, _)| *at < since) {
            Some((_, total)) => self.total - total,
            None => self.total,
        }
    }

    /// Bytes transferred within the `window` preceding `now`.
    pub fn over(&self, window: Duration, now: Instant) -> u64 {
        match now.checked_sub(window) {
            Some(since) => self.since(since),
            None => self.total,
        }
    }

    fn prune(&mut self, now: Instant) {
        let Some(horizon) = now.checked_sub(SAMPLE_RETENTION) else {
            return;
        };
        // keep one sample older than the horizon as the anchor
        while self.samples.len() > 1 && self.samples[1].0 < horizon {
            self.samples.pop_front();
        }
    }
}

/// The upload and download counters of a session.
#[derive(Clone, Debug)]
pub struct ThruputCounters {
    pub uploaded: ThruputCounter,
    pub downloaded: ThruputCounter,
}

impl ThruputCounters {
    pub fn new(now: Instant) -> Self {
        Self {
            uploaded: ThruputCounter::new(now),
            downloaded: ThruputCounter::new(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_since_scans_back_to_older_sample() {
        let t0 = Instant::now();
        let mut counter = ThruputCounter::new(t0);
        counter.record(100, t0 + Duration::from_secs(1));
        counter.record(50, t0 + Duration::from_secs(2));
        counter.record(25, t0 + Duration::from_secs(3));

        assert_eq!(counter.total(), 175);
        // the first sample older than 2.5s is the one at 2s (total 150)
        assert_eq!(counter.since(t0 + Duration::from_millis(2500)), 25);
        // the first sample older than 1.5s is the one at 1s (total 100)
        assert_eq!(counter.since(t0 + Duration::from_millis(1500)), 75);
        // nothing older than t0, so everything counts
        assert_eq!(counter.since(t0), 175);
        assert_eq!(counter.since(t0 + Duration::from_secs(10)), 0);
    }

    #[test]
    fn test_over_window() {
        let t0 = Instant::now();
        let mut counter = ThruputCounter::new(t0);
        counter.record(10, t0 + Duration::from_secs(1));
        counter.record(20, t0 + Duration::from_secs(5));
        let now = t0 + Duration::from_secs(6);
        assert_eq!(counter.over(Duration::from_secs(2), now), 20);
    }

    #[test]
    fn test_prune_keeps_anchor() {
        let t0 = Instant::now();
        let mut counter = ThruputCounter::new(t0);
        for i in 1..=100 {
            counter.record(1, t0 + Duration::from_secs(i));
        }
        assert!(counter.samples.len() <= 62);
        let now = t0 + Duration::from_secs(100);
        assert_eq!(counter.over(Duration::from_millis(9500), now), 10);
        assert_eq!(counter.total(), 100);
    }
}
