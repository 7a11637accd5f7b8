//! Vidra Core Library
//!
//! This crate provides the domain models, error types, configuration, validation
//! and progress reporting shared by the upload and playback crates.

pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod validation;

// Re-export commonly used types
pub use config::{Config, PlaybackConfig, UploadConfig};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use events::ProgressReporter;
