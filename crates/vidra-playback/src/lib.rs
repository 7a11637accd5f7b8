//! Vidra Playback
//!
//! Resolves an HLS master playlist into a [`MediaAsset`](vidra_core::models::MediaAsset)
//! and plays it through a [`RenderingSurface`], choosing the variant from measured
//! throughput and buffer level and recovering from segment failures.

pub mod abr;
pub mod engine;
pub mod fetch;
pub mod manifest;
pub mod surface;

pub use abr::{AbrController, AbrDecision, AbrReason, Estimator, FixedEstimate, ThroughputEstimator};
pub use engine::{PlaybackCommand, PlaybackEngine};
pub use fetch::{FetchError, HttpFetcher, SegmentFetcher};
pub use manifest::ManifestResolver;
pub use surface::{ClockSurface, RenderingSurface};
