use std::time::Duration;

use tokio::time::Instant;

/// Link throughput accounting for fetches that overlap in time.
///
/// Fetches issued concurrently share one link, so timing each of them on its own
/// credits every fetch with only part of the bandwidth. The meter charges each
/// completed fetch only for wall-clock time no earlier fetch was charged for; idle
/// gaps between fetches are never charged.
#[derive(Debug, Default)]
pub struct LinkMeter {
    charged_until: Option<Instant>,
    /// Bytes that finished inside time already charged to an earlier sample
    carried_bytes: u64,
}

impl LinkMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for a fetch of `bytes` that ran from `started` to `finished`. Returns
    /// the sample to feed the estimator, or `None` when the fetch finished inside
    /// time already charged; its bytes then ride along with the next sample.
    pub fn record(
        &mut self,
        bytes: u64,
        started: Instant,
        finished: Instant,
    ) -> Option<(u64, Duration)> {
        let from = match self.charged_until {
            Some(until) if until > started => until,
            _ => started,
        };
        if finished <= from {
            self.carried_bytes += bytes;
            return None;
        }
        self.charged_until = Some(finished);
        let total = bytes + std::mem::take(&mut self.carried_bytes);
        Some((total, finished - from))
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
