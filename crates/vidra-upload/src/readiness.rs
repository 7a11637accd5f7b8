//! Strategies for waiting until the transcoder has produced a playable asset.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use uuid::Uuid;
use vidra_core::models::ProcessingStatus;
use vidra_core::{AppError, UploadConfig};

use crate::coordinator::{ProcessingReport, UploadCoordinator};

#[async_trait]
pub trait ReadinessStrategy: Send + Sync {
    /// Resolve once the asset is ready. Errors with `ProcessingFailure` when the
    /// transcoder reports failure or the wait gives up.
    async fn wait(
        &self,
        asset_id: Uuid,
        coordinator: &dyn UploadCoordinator,
    ) -> Result<ProcessingReport, AppError>;
}

fn check(report: ProcessingReport) -> Option<Result<ProcessingReport, AppError>> {
    if report.status.is_ready() {
        Some(Ok(report))
    } else if report.status.is_failed() {
        Some(Err(AppError::ProcessingFailure(
            "transcoder reported failure".to_string(),
        )))
    } else {
        None
    }
}

/// Poll `processing_status` at a fixed interval until ready, failed, or timed out.
#[derive(Debug, Clone)]
pub struct PollingReadiness {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollingReadiness {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    pub fn from_config(config: &UploadConfig) -> Self {
        Self::new(config.readiness_poll_interval, config.readiness_timeout)
    }
}

#[async_trait]
impl ReadinessStrategy for PollingReadiness {
    #[tracing::instrument(skip(self, coordinator), fields(asset_id = %asset_id))]
    async fn wait(
        &self,
        asset_id: Uuid,
        coordinator: &dyn UploadCoordinator,
    ) -> Result<ProcessingReport, AppError> {
        let poll = async {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match coordinator.processing_status(asset_id).await {
                    Ok(report) => {
                        tracing::debug!(status = %report.status, "Polled processing status");
                        if let Some(result) = check(report) {
                            return result;
                        }
                    }
                    // the status endpoint being briefly unavailable does not fail the upload
                    Err(e) => tracing::warn!(error = %e, "Processing status poll failed"),
                }
            }
        };

        tokio::time::timeout(self.timeout, poll)
            .await
            .unwrap_or_else(|_| {
                Err(AppError::ProcessingFailure(format!(
                    "asset not ready after {}s",
                    self.timeout.as_secs()
                )))
            })
    }
}

/// Sender side of a [`PushReadiness`]; fed by whatever receives the service's push
/// notifications.
#[derive(Debug, Clone)]
pub struct PushHandle {
    tx: watch::Sender<Option<ProcessingReport>>,
}

impl PushHandle {
    pub fn publish(&self, report: ProcessingReport) {
        self.tx.send_replace(Some(report));
    }

    pub fn publish_status(&self, status: ProcessingStatus, manifest_url: Option<String>) {
        self.publish(ProcessingReport {
            status,
            manifest_url,
        });
    }
}

/// Wait for a pushed status instead of polling.
#[derive(Debug, Clone)]
pub struct PushReadiness {
    rx: watch::Receiver<Option<ProcessingReport>>,
    timeout: Option<Duration>,
}

impl PushReadiness {
    pub fn channel() -> (PushHandle, PushReadiness) {
        let (tx, rx) = watch::channel(None);
        (PushHandle { tx }, PushReadiness { rx, timeout: None })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl ReadinessStrategy for PushReadiness {
    async fn wait(
        &self,
        _asset_id: Uuid,
        _coordinator: &dyn UploadCoordinator,
    ) -> Result<ProcessingReport, AppError> {
        let mut rx = self.rx.clone();
        let push = async move {
            loop {
                let current = rx.borrow_and_update().clone();
                if let Some(result) = current.and_then(check) {
                    return result;
                }
                if rx.changed().await.is_err() {
                    return Err(AppError::Coordination(
                        "readiness notification channel closed".to_string(),
                    ));
                }
            }
        };

        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, push).await.unwrap_or_else(|_| {
                Err(AppError::ProcessingFailure(
                    "no readiness notification before timeout".to_string(),
                ))
            }),
            None => push.await,
        }
    }
}
