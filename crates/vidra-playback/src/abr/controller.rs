use std::time::Duration;

use vidra_core::models::SwitchReason;
use vidra_core::PlaybackConfig;

use super::Estimator;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AbrReason {
    UpSwitch,
    DownSwitch,
    /// Buffer below the low watermark while playing
    LowWatermark,
    NoEstimate,
    AlreadyOptimal,
}

impl AbrReason {
    pub fn switch_reason(&self) -> Option<SwitchReason> {
        match self {
            AbrReason::UpSwitch => Some(SwitchReason::ThroughputUp),
            AbrReason::DownSwitch => Some(SwitchReason::ThroughputDown),
            AbrReason::LowWatermark => Some(SwitchReason::LowWatermark),
            AbrReason::NoEstimate | AbrReason::AlreadyOptimal => None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AbrDecision {
    pub target_variant_index: usize,
    pub reason: AbrReason,
    pub changed: bool,
}

/// Picks the variant to fetch next from a bitrate ladder (ascending).
pub struct AbrController<E: Estimator> {
    estimator: E,
    safety_ratio: f64,
    low_watermark_secs: f64,
    bitrates: Vec<u64>,
    current: usize,
}

impl<E: Estimator> AbrController<E> {
    pub fn new(config: &PlaybackConfig, estimator: E) -> Self {
        Self {
            estimator,
            safety_ratio: config.abr_safety_ratio,
            low_watermark_secs: config.low_watermark_secs,
            bitrates: Vec::new(),
            current: 0,
        }
    }

    /// Install a new ladder and start again from its lowest variant.
    pub fn set_ladder(&mut self, bitrates: Vec<u64>) {
        self.bitrates = bitrates;
        self.current = 0;
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn switch_to(&mut self, index: usize) {
        self.current = index.min(self.bitrates.len().saturating_sub(1));
    }

    pub fn estimate_bps(&self) -> Option<u64> {
        self.estimator.estimate_bps()
    }

    pub fn push_sample(&mut self, bytes: u64, elapsed: Duration) {
        self.estimator.push_sample(bytes, elapsed);
    }

    pub fn reset_estimator(&mut self) {
        self.estimator.reset();
    }

    /// Highest variant whose bitrate fits within the discounted estimate, or the
    /// lowest variant when none does.
    fn throughput_fit(&self, estimate_bps: u64) -> usize {
        let budget = estimate_bps as f64 * self.safety_ratio;
        self.bitrates
            .iter()
            .rposition(|&bw| bw as f64 <= budget)
            .unwrap_or(0)
    }

    /// Decide the variant for the next segment.
    ///
    /// `buffered_ahead_secs` is the buffered media time ahead of the playback position;
    /// the low-watermark rule only applies once `playback_started`. With
    /// `allow_upgrade` false the decision never moves above the current variant.
    pub fn decide(
        &self,
        buffered_ahead_secs: f64,
        playback_started: bool,
        allow_upgrade: bool,
    ) -> AbrDecision {
        let current = self.current;
        let estimate = self.estimator.estimate_bps();

        if playback_started && buffered_ahead_secs < self.low_watermark_secs && current > 0 {
            let fit = estimate.map_or(current - 1, |bps| self.throughput_fit(bps));
            let target = (current - 1).min(fit);
            tracing::debug!(
                current,
                target,
                buffered_ahead_secs,
                estimate_bps = ?estimate,
                "ABR decide: below low watermark"
            );
            return AbrDecision {
                target_variant_index: target,
                reason: AbrReason::LowWatermark,
                changed: true,
            };
        }

        let Some(estimate_bps) = estimate else {
            return AbrDecision {
                target_variant_index: current,
                reason: AbrReason::NoEstimate,
                changed: false,
            };
        };

        let mut target = self.throughput_fit(estimate_bps);
        if !allow_upgrade {
            target = target.min(current);
        }
        tracing::debug!(
            current,
            target,
            estimate_bps,
            buffered_ahead_secs,
            safety_ratio = self.safety_ratio,
            "ABR decide: throughput"
        );

        let reason = match target.cmp(&current) {
            std::cmp::Ordering::Greater => AbrReason::UpSwitch,
            std::cmp::Ordering::Less => AbrReason::DownSwitch,
            std::cmp::Ordering::Equal => AbrReason::AlreadyOptimal,
        };
        AbrDecision {
            target_variant_index: target,
            reason,
            changed: target != current,
        }
    }
}
