//! Data models for the application
//!
//! Upload-side models (file, destination, session, lifecycle), the wire types of the
//! upload-coordination service, and the read-only media asset produced by the
//! transcoder together with the playback state machine.

mod asset;
pub mod coordination;
mod playback;
mod upload;

// Re-export all models for convenient imports
pub use asset::*;
pub use coordination::{
    CompleteUploadRequest, CompleteUploadResponse, InitUploadRequest, InitUploadResponse,
    ProcessingStatus, VideoStatusResponse,
};
pub use playback::*;
pub use upload::*;
