use std::collections::VecDeque;
use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::Serialize;

/// Playback lifecycle for the loaded asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Uninitialized,
    Buffering,
    Playing,
    Stalled,
    Ended,
    Fatal,
}

impl PlaybackState {
    /// `Ended` and `Fatal` are final for the loaded asset.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlaybackState::Ended | PlaybackState::Fatal)
    }

    pub fn can_transition_to(&self, next: PlaybackState) -> bool {
        use PlaybackState::*;
        match (self, next) {
            (a, b) if *a == b => false,
            (_, Fatal) => !self.is_terminal(),
            (Uninitialized, Buffering) => true,
            (Buffering, Playing | Stalled | Ended) => true,
            (Playing, Stalled | Ended | Buffering) => true,
            (Stalled, Playing | Buffering | Ended) => true,
            _ => false,
        }
    }
}

impl Display for PlaybackState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let s = match self {
            PlaybackState::Uninitialized => "uninitialized",
            PlaybackState::Buffering => "buffering",
            PlaybackState::Playing => "playing",
            PlaybackState::Stalled => "stalled",
            PlaybackState::Ended => "ended",
            PlaybackState::Fatal => "fatal",
        };
        write!(f, "{}", s)
    }
}

/// Why the active variant changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchReason {
    Initial,
    ThroughputUp,
    ThroughputDown,
    LowWatermark,
    SegmentFailure,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlaybackEvent {
    StateChanged {
        from: PlaybackState,
        to: PlaybackState,
    },
    VariantSwitched {
        from: usize,
        to: usize,
        reason: SwitchReason,
    },
    SegmentAppended {
        variant: usize,
        index: usize,
        bytes: u64,
    },
    SegmentFailed {
        variant: usize,
        index: usize,
        consecutive: u32,
        message: String,
    },
    Error {
        code: String,
        message: String,
    },
}

#[derive(Debug, Clone, Copy)]
struct BufferedSegment {
    end: f64,
    bytes: u64,
}

/// Per-asset playback state. Replaced wholesale when a new asset is loaded.
#[derive(Debug, Clone)]
pub struct PlaybackSession {
    /// Incremented on every load; results tagged with an older generation are dropped
    pub generation: u64,
    pub state: PlaybackState,
    pub variant: usize,
    pub buffered_start: f64,
    pub buffered_end: f64,
    pub buffered_bytes: u64,
    pub estimate_bps: Option<u64>,
    pub consecutive_stalls: u32,
    /// Segment currently failing and how many times in a row
    pub failing_segment: Option<usize>,
    pub segment_failures: u32,
    buffered: VecDeque<BufferedSegment>,
}

impl PlaybackSession {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            state: PlaybackState::Uninitialized,
            variant: 0,
            buffered_start: 0.0,
            buffered_end: 0.0,
            buffered_bytes: 0,
            estimate_bps: None,
            consecutive_stalls: 0,
            failing_segment: None,
            segment_failures: 0,
            buffered: VecDeque::new(),
        }
    }

    /// Buffered media time ahead of `position`.
    pub fn buffered_ahead(&self, position: f64) -> f64 {
        (self.buffered_end - position.max(self.buffered_start)).max(0.0)
    }

    /// Extend the buffered range with a segment ending at `end`.
    pub fn record_append(&mut self, end: f64, bytes: u64) {
        self.buffered_end = self.buffered_end.max(end);
        self.buffered_bytes += bytes;
        self.buffered.push_back(BufferedSegment { end, bytes });
        self.failing_segment = None;
        self.segment_failures = 0;
    }

    /// Forget segments the position has moved past.
    pub fn evict_played(&mut self, position: f64) {
        while let Some(front) = self.buffered.front() {
            if front.end > position {
                break;
            }
            self.buffered_bytes = self.buffered_bytes.saturating_sub(front.bytes);
            self.buffered_start = front.end;
            self.buffered.pop_front();
        }
    }

    /// Count a failure of `segment`; returns the consecutive-failure count.
    pub fn record_failure(&mut self, segment: usize) -> u32 {
        if self.failing_segment == Some(segment) {
            self.segment_failures += 1;
        } else {
            self.failing_segment = Some(segment);
            self.segment_failures = 1;
        }
        self.segment_failures
    }
}
