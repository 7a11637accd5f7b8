use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;
use vidra_api_client::{ApiClient, Auth};
use vidra_core::models::{
    FailureReason, FileDescriptor, ProcessingStatus, TargetMetadata, UploadStatus,
};
use vidra_core::{AppError, UploadConfig};
use vidra_upload::{HttpTransferClient, MemorySource, UploadCoordinator, UploadOrchestrator};

const VIDEO_ID: &str = "7f0c1d52-6a9e-4b0e-9d57-0b1f2c3d4e5f";

fn client(url: String) -> ApiClient {
    ApiClient::new(url, Auth::Bearer("token".into())).unwrap()
}

#[tokio::test]
async fn test_request_destination_maps_init_upload() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/videos/init-upload")
        .with_status(200)
        .with_body(format!(
            r#"{{"video_id":"{}","upload_url":"http://minio:9000/videos/uploads/{}/original.mp4?X-Amz-Signature=s","expires_in":3600}}"#,
            VIDEO_ID, VIDEO_ID
        ))
        .create_async()
        .await;

    let metadata = TargetMetadata {
        channel_id: Uuid::new_v4(),
        title: "  Trip  ".into(),
        description: None,
        tags: vec![],
    };
    let file = FileDescriptor::new("trip.mov", 10, "video/quicktime");
    let grant = client(server.url())
        .request_destination(&file, &metadata)
        .await
        .unwrap();

    assert_eq!(grant.asset_id.to_string(), VIDEO_ID);
    assert_eq!(
        grant.destination.headers.get("Content-Type").map(String::as_str),
        Some("video/quicktime")
    );
    assert!(grant.destination.url.contains("original.mp4"));
}

#[tokio::test]
async fn test_out_of_range_expiry_fails_initiate() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/videos/init-upload")
        .with_status(200)
        .with_body(format!(
            r#"{{"video_id":"{}","upload_url":"http://minio:9000/put","expires_in":4611686018427387904}}"#,
            VIDEO_ID
        ))
        .create_async()
        .await;

    let orchestrator = UploadOrchestrator::new(
        Arc::new(client(server.url())),
        Arc::new(HttpTransferClient::new(Duration::from_secs(5)).unwrap()),
        UploadConfig::default(),
    );
    let metadata = TargetMetadata {
        channel_id: Uuid::new_v4(),
        title: "Trip".into(),
        description: None,
        tags: vec![],
    };
    let file = FileDescriptor::new("trip.mp4", 4, "video/mp4");

    let err = orchestrator
        .initiate(file, metadata, Arc::new(MemorySource::new(vec![0u8; 4])))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Coordination(_)));
    assert_eq!(
        orchestrator.status(),
        UploadStatus::Failed(FailureReason::Coordination)
    );
}

#[tokio::test]
async fn test_processing_status_exposes_manifest_url() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", format!("/videos/{}", VIDEO_ID).as_str())
        .with_status(200)
        .with_body(format!(
            r#"{{"id":"{}","status":"published","hls_master_url":"http://cdn/master.m3u8"}}"#,
            VIDEO_ID
        ))
        .create_async()
        .await;

    let report = client(server.url())
        .processing_status(VIDEO_ID.parse().unwrap())
        .await
        .unwrap();

    assert_eq!(report.status, ProcessingStatus::Published);
    assert_eq!(report.manifest_url.as_deref(), Some("http://cdn/master.m3u8"));
}

#[tokio::test]
async fn test_service_errors_become_coordination_errors() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/videos/complete-upload")
        .with_status(403)
        .with_body(r#"{"detail":"Not authorized"}"#)
        .create_async()
        .await;

    let err = client(server.url())
        .notify_upload_complete(VIDEO_ID.parse().unwrap())
        .await
        .unwrap_err();

    match err {
        AppError::Coordination(message) => assert!(message.contains("403")),
        other => panic!("unexpected error {:?}", other),
    }
}
