use std::time::Duration;

/// Throughput estimation strategy used by [`AbrController`](super::AbrController).
pub trait Estimator: Send {
    /// Estimated throughput in bits per second, if known.
    fn estimate_bps(&self) -> Option<u64>;

    /// Record `bytes` fetched over `elapsed`.
    fn push_sample(&mut self, bytes: u64, elapsed: Duration);

    /// Forget everything measured so far.
    fn reset(&mut self);
}

/// Dual EWMA of segment throughput; the more pessimistic of the fast and slow
/// averages wins.
#[derive(Clone, Debug)]
pub struct ThroughputEstimator {
    fast: Ewma,
    slow: Ewma,
    initial_bps: Option<u64>,
}

impl ThroughputEstimator {
    const FAST_HALF_LIFE_SECS: f64 = 2.0;
    const SLOW_HALF_LIFE_SECS: f64 = 10.0;
    /// Samples smaller than this say more about latency than bandwidth.
    const MIN_SAMPLE_BYTES: u64 = 16_000;
    const MIN_DURATION_SECS: f64 = 0.0005;

    pub fn new(initial_bps: Option<u64>) -> Self {
        Self {
            fast: Ewma::new(Self::FAST_HALF_LIFE_SECS),
            slow: Ewma::new(Self::SLOW_HALF_LIFE_SECS),
            initial_bps,
        }
    }
}

impl Estimator for ThroughputEstimator {
    fn estimate_bps(&self) -> Option<u64> {
        let est = self.fast.estimate().min(self.slow.estimate());
        if est > 0.0 {
            Some(est.round() as u64)
        } else {
            self.initial_bps
        }
    }

    fn push_sample(&mut self, bytes: u64, elapsed: Duration) {
        if bytes < Self::MIN_SAMPLE_BYTES {
            return;
        }
        let secs = elapsed.as_secs_f64().max(Self::MIN_DURATION_SECS);
        let bps = bytes as f64 * 8.0 / secs;
        self.fast.add_sample(secs, bps);
        self.slow.add_sample(secs, bps);
    }

    fn reset(&mut self) {
        self.fast = Ewma::new(Self::FAST_HALF_LIFE_SECS);
        self.slow = Ewma::new(Self::SLOW_HALF_LIFE_SECS);
    }
}

/// Estimator that always reports the same value; for tests and manual overrides.
#[derive(Clone, Copy, Debug, Default)]
pub struct FixedEstimate(pub Option<u64>);

impl Estimator for FixedEstimate {
    fn estimate_bps(&self) -> Option<u64> {
        self.0
    }

    fn push_sample(&mut self, _bytes: u64, _elapsed: Duration) {}

    fn reset(&mut self) {}
}

#[derive(Clone, Debug)]
struct Ewma {
    alpha: f64,
    last_estimate: f64,
    total_weight: f64,
}

impl Ewma {
    fn new(half_life_secs: f64) -> Self {
        Self {
            alpha: f64::exp(0.5_f64.ln() / half_life_secs.max(0.001)),
            last_estimate: 0.0,
            total_weight: 0.0,
        }
    }

    fn add_sample(&mut self, weight: f64, value: f64) {
        let adj_alpha = self.alpha.powf(weight.max(0.0));
        self.last_estimate = value * (1.0 - adj_alpha) + adj_alpha * self.last_estimate;
        self.total_weight += weight.max(0.0);
    }

    /// Zero-bias corrected estimate.
    fn estimate(&self) -> f64 {
        if self.total_weight <= 0.0 {
            return 0.0;
        }
        let zero_factor = 1.0 - self.alpha.powf(self.total_weight);
        self.last_estimate / zero_factor.max(1e-6)
    }
}
