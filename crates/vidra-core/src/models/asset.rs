use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AppError;

/// Tolerance when comparing media times derived from summed float durations.
const TIME_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u64,
    pub height: u64,
}

impl Display for Resolution {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One media segment of a variant. Times are seconds of media time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub index: usize,
    pub start: f64,
    pub duration: f64,
    pub url: Url,
}

impl Segment {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// One rendition in the bitrate ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    /// Position in the ascending ladder
    pub index: usize,
    pub bitrate_bps: u64,
    pub resolution: Option<Resolution>,
    pub codecs: Option<String>,
    pub playlist_url: Url,
    pub segments: Vec<Segment>,
}

impl Variant {
    pub fn duration(&self) -> f64 {
        self.segments.last().map(Segment::end).unwrap_or(0.0)
    }

    /// Index of the segment whose time range covers `time`, if any.
    pub fn segment_index_at(&self, time: f64) -> Option<usize> {
        let pos = self
            .segments
            .partition_point(|s| s.end() <= time + TIME_EPSILON);
        self.segments.get(pos).map(|s| s.index)
    }

    /// Short human label, e.g. `720p@2000k`.
    pub fn label(&self) -> String {
        match self.resolution {
            Some(r) => format!("{}p@{}k", r.height, self.bitrate_bps / 1000),
            None => format!("{}k", self.bitrate_bps / 1000),
        }
    }
}

/// A playable asset: variants strictly ascending by bitrate, never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaAsset {
    /// Derived from the master playlist URL
    pub id: String,
    pub duration: f64,
    variants: Vec<Variant>,
}

impl MediaAsset {
    /// Build an asset from an already ordered ladder.
    pub fn new(id: impl Into<String>, mut variants: Vec<Variant>) -> Result<Self, AppError> {
        if variants.is_empty() {
            return Err(AppError::NoVariants);
        }
        if variants
            .windows(2)
            .any(|w| w[0].bitrate_bps >= w[1].bitrate_bps)
        {
            return Err(AppError::ManifestParse(
                "variant bitrates must be strictly ascending".to_string(),
            ));
        }
        for (i, v) in variants.iter_mut().enumerate() {
            v.index = i;
        }
        let duration = variants
            .iter()
            .map(Variant::duration)
            .fold(0.0_f64, f64::max);
        Ok(Self {
            id: id.into(),
            duration,
            variants,
        })
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn variant(&self, index: usize) -> Option<&Variant> {
        self.variants.get(index)
    }

    pub fn lowest(&self) -> usize {
        0
    }

    pub fn highest(&self) -> usize {
        self.variants.len() - 1
    }
}
