//! Clock offset estimation.
//!
//! Each pong yields one sample: `offset = serverTime - (sendTime + rtt / 2)`.
//! The last five samples are kept and the working offset is their median,
//! which shrugs off a single slow round trip.

use std::collections::VecDeque;

/// Samples kept.
pub const MAX_SAMPLES: usize = 5;

/// One ping/pong measurement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockSample {
    /// Authority minus local time, ms.
    pub offset_ms: i64,
    /// Round trip, ms.
    pub rtt_ms: u64,
}

/// Rolling offset estimate.
#[derive(Clone, Debug, Default)]
pub struct ClockSync {
    samples: VecDeque<ClockSample>,
}

fn median(values: &mut [i64]) -> Option<i64> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]).div_euclid(2))
    }
}

impl ClockSync {
    /// Empty estimator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pong. Returns that sample's offset.
    pub fn record_pong(&mut self, sent_local_ms: u64, server_time_ms: u64, received_local_ms: u64) -> i64 {
        let rtt = received_local_ms.saturating_sub(sent_local_ms);
        let offset = server_time_ms as i64 - (sent_local_ms + rtt / 2) as i64;
        self.add_sample(ClockSample { offset_ms: offset, rtt_ms: rtt });
        offset
    }

    /// Add a sample, evicting the oldest past the window.
    pub fn add_sample(&mut self, sample: ClockSample) {
        if self.samples.len() == MAX_SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Whether any sample has been taken.
    pub fn is_synced(&self) -> bool {
        !self.samples.is_empty()
    }

    /// Median offset, 0 before the first sample.
    pub fn offset_ms(&self) -> i64 {
        let mut offsets: Vec<i64> = self.samples.iter().map(|s| s.offset_ms).collect();
        median(&mut offsets).unwrap_or(0)
    }

    /// Median round trip.
    pub fn rtt_ms(&self) -> Option<u64> {
        let mut rtts: Vec<i64> = self.samples.iter().map(|s| s.rtt_ms as i64).collect();
        median(&mut rtts).map(|r| r.max(0) as u64)
    }

    /// Authority instant expressed on the local clock.
    pub fn to_local(&self, server_ms: u64) -> i64 {
        server_ms as i64 - self.offset_ms()
    }

    /// Local instant expressed on the authority clock.
    pub fn to_server(&self, local_ms: u64) -> i64 {
        local_ms as i64 + self.offset_ms()
    }
}
