//! The upload-coordination collaborator.
//!
//! The orchestrator only talks to the coordination service through
//! [`UploadCoordinator`]; the HTTP implementation wraps `vidra_api_client::ApiClient`,
//! which carries the caller's credentials.

use async_trait::async_trait;
use uuid::Uuid;
use vidra_api_client::ApiClient;
use vidra_core::models::{
    FileDescriptor, InitUploadRequest, ProcessingStatus, TargetMetadata, UploadDestination,
};
use vidra_core::AppError;

/// Result of a successful destination request.
#[derive(Debug, Clone)]
pub struct DestinationGrant {
    pub asset_id: Uuid,
    pub destination: UploadDestination,
}

/// Processing state of an asset as seen by the client.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingReport {
    pub status: ProcessingStatus,
    /// Master playlist URL, present once the asset is playable
    pub manifest_url: Option<String>,
}

#[async_trait]
pub trait UploadCoordinator: Send + Sync {
    /// Create the asset record and obtain a one-shot write destination.
    async fn request_destination(
        &self,
        file: &FileDescriptor,
        metadata: &TargetMetadata,
    ) -> Result<DestinationGrant, AppError>;

    /// Report that every byte is written; queues processing.
    async fn notify_upload_complete(&self, asset_id: Uuid) -> Result<(), AppError>;

    async fn processing_status(&self, asset_id: Uuid) -> Result<ProcessingReport, AppError>;

    /// Give the destination back after a cancelled upload. Presigned URLs expire on
    /// their own, so the default does nothing.
    async fn release_destination(&self, _asset_id: Uuid) -> Result<(), AppError> {
        Ok(())
    }
}

fn coordination_error(err: anyhow::Error) -> AppError {
    AppError::Coordination(format!("{:#}", err))
}

#[async_trait]
impl UploadCoordinator for ApiClient {
    async fn request_destination(
        &self,
        file: &FileDescriptor,
        metadata: &TargetMetadata,
    ) -> Result<DestinationGrant, AppError> {
        let request = InitUploadRequest {
            channel_id: metadata.channel_id,
            title: metadata.title.trim().to_string(),
            description: metadata.description.clone(),
            tags: metadata.tags.clone(),
        };
        let response = self.init_upload(&request).await.map_err(coordination_error)?;

        Ok(DestinationGrant {
            asset_id: response.video_id,
            destination: UploadDestination::new(
                response.upload_url,
                &file.media_type,
                response.headers,
                response.expires_in,
            )?,
        })
    }

    async fn notify_upload_complete(&self, asset_id: Uuid) -> Result<(), AppError> {
        self.complete_upload(asset_id)
            .await
            .map(|_| ())
            .map_err(coordination_error)
    }

    async fn processing_status(&self, asset_id: Uuid) -> Result<ProcessingReport, AppError> {
        let video = self.get_video(asset_id).await.map_err(coordination_error)?;
        Ok(ProcessingReport {
            status: video.status,
            manifest_url: video.hls_master_url,
        })
    }
}
