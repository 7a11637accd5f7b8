//! Where fetched segments go.

use bytes::Bytes;
use tokio::time::Instant;
use vidra_core::models::Segment;
use vidra_core::AppError;

/// Sink for media data plus the playback clock.
///
/// Segments are appended in strictly ascending media-time order. The position never
/// runs past the end of what has been appended.
pub trait RenderingSurface: Send {
    fn append(&mut self, variant: usize, segment: &Segment, data: Bytes) -> Result<(), AppError>;

    /// Current playback position in seconds of media time.
    fn position(&self) -> f64;

    /// Drop all buffered media and rewind to 0.
    fn reset(&mut self);

    fn set_paused(&mut self, paused: bool);
}

/// Surface that discards media bytes and advances its position with wall-clock time
/// while playing.
#[derive(Debug)]
pub struct ClockSurface {
    base_position: f64,
    resumed_at: Option<Instant>,
    appended_end: f64,
    appended_bytes: u64,
    speed: f64,
}

impl Default for ClockSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSurface {
    pub fn new() -> Self {
        Self {
            base_position: 0.0,
            resumed_at: None,
            appended_end: 0.0,
            appended_bytes: 0,
            speed: 1.0,
        }
    }

    /// Play faster (or slower) than real time.
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed.max(0.0);
        self
    }

    pub fn appended_bytes(&self) -> u64 {
        self.appended_bytes
    }

    fn elapsed(&self) -> f64 {
        self.resumed_at
            .map(|at| at.elapsed().as_secs_f64() * self.speed)
            .unwrap_or(0.0)
    }
}

impl RenderingSurface for ClockSurface {
    fn append(&mut self, _variant: usize, segment: &Segment, data: Bytes) -> Result<(), AppError> {
        self.appended_end = self.appended_end.max(segment.end());
        self.appended_bytes += data.len() as u64;
        Ok(())
    }

    fn position(&self) -> f64 {
        (self.base_position + self.elapsed()).min(self.appended_end)
    }

    fn reset(&mut self) {
        *self = Self::new().with_speed(self.speed);
    }

    fn set_paused(&mut self, paused: bool) {
        match (paused, self.resumed_at) {
            (true, Some(_)) => {
                self.base_position = self.position();
                self.resumed_at = None;
            }
            (false, None) => self.resumed_at = Some(Instant::now()),
            _ => {}
        }
    }
}
