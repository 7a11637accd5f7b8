//! Adaptive bitrate selection.

mod controller;
mod estimator;
mod meter;

pub use controller::{AbrController, AbrDecision, AbrReason};
pub use estimator::{Estimator, FixedEstimate, ThroughputEstimator};
pub use meter::LinkMeter;
