//! Wire types of the upload-coordination service.

use std::collections::HashMap;
use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn default_expires_in() -> u64 {
    3600
}

/// Request to create a video record and obtain a presigned upload URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitUploadRequest {
    pub channel_id: Uuid,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Response containing the presigned URL for the one-shot PUT
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitUploadResponse {
    /// Video ID (used to complete the upload and to poll processing status)
    pub video_id: Uuid,
    /// Presigned URL for the direct upload
    pub upload_url: String,
    /// URL lifetime in seconds
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
    /// Extra headers the store requires on the PUT, if any
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// Request to report that the bytes are fully written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteUploadRequest {
    pub video_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteUploadResponse {
    #[serde(default)]
    pub message: Option<String>,
    pub video_id: Uuid,
}

/// Processing status as reported by the coordination service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Uploading,
    Processing,
    Ready,
    Published,
    Failed,
}

impl ProcessingStatus {
    /// Transcoding finished and the HLS output is playable.
    pub fn is_ready(&self) -> bool {
        matches!(self, ProcessingStatus::Ready | ProcessingStatus::Published)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ProcessingStatus::Failed)
    }
}

impl Display for ProcessingStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ProcessingStatus::Uploading => write!(f, "uploading"),
            ProcessingStatus::Processing => write!(f, "processing"),
            ProcessingStatus::Ready => write!(f, "ready"),
            ProcessingStatus::Published => write!(f, "published"),
            ProcessingStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Video record as returned by `GET /videos/{id}`. Only the fields the client uses
/// are required; the rest of the record is ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoStatusResponse {
    pub id: Uuid,
    pub status: ProcessingStatus,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub hls_master_url: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}
