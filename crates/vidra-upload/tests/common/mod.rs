#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use vidra_core::models::{
    FileDescriptor, ProcessingStatus, TargetMetadata, UploadDestination, UploadEvent,
};
use vidra_core::{AppError, UploadConfig};
use vidra_upload::{
    ByteSource, DestinationGrant, ProcessingReport, ProgressFn, TransferClient, TransferFailure,
    UploadCoordinator,
};

pub const FILE_SIZE: u64 = 1000;

pub fn file() -> FileDescriptor {
    FileDescriptor::new("holiday.mp4", FILE_SIZE, "video/mp4")
}

pub fn metadata() -> TargetMetadata {
    TargetMetadata {
        channel_id: Uuid::new_v4(),
        title: "Holiday".to_string(),
        description: Some("beach".to_string()),
        tags: vec!["travel".to_string()],
    }
}

pub fn config() -> UploadConfig {
    UploadConfig {
        max_retries: 3,
        retry_base_delay: Duration::from_millis(1),
        retry_max_delay: Duration::from_millis(5),
        ..Default::default()
    }
}

pub fn source() -> Arc<dyn ByteSource> {
    Arc::new(vidra_upload::MemorySource::new(vec![0u8; FILE_SIZE as usize]))
}

#[derive(Default)]
pub struct FakeCoordinator {
    pub asset_id: Uuid,
    pub destination_requests: AtomicUsize,
    pub complete_calls: AtomicUsize,
    pub release_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub fail_destination: bool,
    pub statuses: Mutex<VecDeque<ProcessingStatus>>,
    /// Delay before `request_destination` answers
    pub destination_delay: Option<Duration>,
    /// Delay before `notify_upload_complete` answers
    pub complete_delay: Option<Duration>,
}

impl FakeCoordinator {
    pub fn new() -> Self {
        Self {
            asset_id: Uuid::new_v4(),
            ..Default::default()
        }
    }

    pub fn with_statuses(self, statuses: &[ProcessingStatus]) -> Self {
        *self.statuses.lock().unwrap() = statuses.iter().copied().collect();
        self
    }
}

#[async_trait]
impl UploadCoordinator for FakeCoordinator {
    async fn request_destination(
        &self,
        file: &FileDescriptor,
        _metadata: &TargetMetadata,
    ) -> Result<DestinationGrant, AppError> {
        self.destination_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.destination_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_destination {
            return Err(AppError::Coordination("init-upload returned 500".into()));
        }
        Ok(DestinationGrant {
            asset_id: self.asset_id,
            destination: UploadDestination::new(
                "http://store.test/put?sig=1",
                &file.media_type,
                Vec::new(),
                3600,
            )
            .unwrap(),
        })
    }

    async fn notify_upload_complete(&self, _asset_id: Uuid) -> Result<(), AppError> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        match self.complete_delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }
        Ok(())
    }

    async fn processing_status(&self, asset_id: Uuid) -> Result<ProcessingReport, AppError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let status = self
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ProcessingStatus::Processing);
        Ok(ProcessingReport {
            status,
            manifest_url: status
                .is_ready()
                .then(|| format!("http://cdn.test/{}/master.m3u8", asset_id)),
        })
    }

    async fn release_destination(&self, _asset_id: Uuid) -> Result<(), AppError> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// What a scripted transfer attempt does.
#[derive(Debug, Clone)]
pub enum Attempt {
    /// Report progress up to `sent` bytes, then fail
    FailAfter { sent: u64, failure: TransferFailure },
    /// Report progress in steps to the full size, then succeed
    Succeed,
    /// Report `sent` bytes and wait until cancelled
    Hang { sent: u64 },
}

pub struct ScriptedTransfer {
    pub attempts: Mutex<VecDeque<Attempt>>,
    pub calls: AtomicUsize,
}

impl ScriptedTransfer {
    pub fn new(script: Vec<Attempt>) -> Self {
        Self {
            attempts: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TransferClient for ScriptedTransfer {
    async fn put(
        &self,
        destination: &UploadDestination,
        source: &dyn ByteSource,
        progress: ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<(), TransferFailure> {
        assert_eq!(destination.headers.get("Content-Type").unwrap(), "video/mp4");
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .attempts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Attempt::Succeed);
        match next {
            Attempt::FailAfter { sent, failure } => {
                for step in (0..=sent).step_by(100) {
                    progress(step);
                }
                Err(failure)
            }
            Attempt::Succeed => {
                let total = source.len();
                for step in (0..=total).step_by(250) {
                    progress(step);
                }
                Ok(())
            }
            Attempt::Hang { sent } => {
                progress(sent);
                cancel.cancelled().await;
                Err(TransferFailure::Cancelled)
            }
        }
    }
}

/// Drain every event already delivered to `rx`.
pub fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<UploadEvent>) -> Vec<UploadEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn progress_values(events: &[UploadEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            UploadEvent::Progress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect()
}
