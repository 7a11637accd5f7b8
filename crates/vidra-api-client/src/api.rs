//! Video upload endpoints of the coordination service.
//!
//! Request and response types live in `vidra_core::models::coordination`.

use anyhow::{Context, Result};
use uuid::Uuid;
use vidra_core::models::{
    CompleteUploadRequest, CompleteUploadResponse, InitUploadRequest, InitUploadResponse,
    VideoStatusResponse,
};

use crate::ApiClient;

impl ApiClient {
    /// Create the video record and obtain a presigned upload URL.
    #[tracing::instrument(skip(self, request), fields(channel_id = %request.channel_id))]
    pub async fn init_upload(&self, request: &InitUploadRequest) -> Result<InitUploadResponse> {
        self.post_json(&format!("{}/videos/init-upload", self.prefix()), request)
            .await
            .context("init-upload request failed")
    }

    /// Report that the bytes are in the store, which queues transcoding.
    #[tracing::instrument(skip(self))]
    pub async fn complete_upload(&self, video_id: Uuid) -> Result<CompleteUploadResponse> {
        let body = CompleteUploadRequest { video_id };
        self.post_json(&format!("{}/videos/complete-upload", self.prefix()), &body)
            .await
            .context("complete-upload request failed")
    }

    /// Fetch the video record, including processing status and master playlist URL.
    pub async fn get_video(&self, video_id: Uuid) -> Result<VideoStatusResponse> {
        self.get(&format!("{}/videos/{}", self.prefix(), video_id), &[])
            .await
            .with_context(|| format!("Failed to fetch video {}", video_id))
    }
}
