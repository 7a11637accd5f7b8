//! Vidra Upload
//!
//! Drives a single video upload from a local file to a presigned destination:
//! obtain the destination, transfer the bytes, notify completion and wait for the
//! transcoder to report readiness.

pub mod coordinator;
pub mod orchestrator;
pub mod readiness;
pub mod transfer;

pub use coordinator::{DestinationGrant, ProcessingReport, UploadCoordinator};
pub use orchestrator::UploadOrchestrator;
pub use readiness::{PollingReadiness, PushHandle, PushReadiness, ReadinessStrategy};
pub use transfer::{
    ByteSource, ByteStream, FileSource, HttpTransferClient, MemorySource, ProgressFn,
    TransferClient, TransferFailure,
};
