//! Upload state machine.
//!
//! `Idle → Initiating → Transferring → AwaitingProcessing → Ready`, with `Failed`
//! reachable from every non-terminal state. Each orchestrator owns exactly one
//! [`UploadSession`]; every state change is published on the `watch` channel and as
//! an ordered [`UploadEvent`], and the event stream closes on the terminal state.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use vidra_core::models::{
    FileDescriptor, TargetMetadata, UploadEvent, UploadOutcome, UploadSession, UploadStatus,
};
use vidra_core::validation::{validate_file_descriptor, validate_target_metadata};
use vidra_core::{AppError, ProgressReporter, UploadConfig};

use crate::coordinator::UploadCoordinator;
use crate::readiness::ReadinessStrategy;
use crate::transfer::{ByteSource, ProgressFn, TransferClient, TransferFailure};

pub struct UploadOrchestrator {
    coordinator: Arc<dyn UploadCoordinator>,
    transfer: Arc<dyn TransferClient>,
    config: UploadConfig,
    session: Mutex<UploadSession>,
    source: Mutex<Option<Arc<dyn ByteSource>>>,
    status_tx: tokio::sync::watch::Sender<UploadStatus>,
    reporter: Arc<ProgressReporter<UploadEvent>>,
    cancel: CancellationToken,
    /// Held by `initiate`, `transfer` and `finalize` while they run; `cancel` waits on it.
    work_lock: tokio::sync::Mutex<()>,
}

impl UploadOrchestrator {
    pub fn new(
        coordinator: Arc<dyn UploadCoordinator>,
        transfer: Arc<dyn TransferClient>,
        config: UploadConfig,
    ) -> Self {
        let (status_tx, _) = tokio::sync::watch::channel(UploadStatus::Idle);
        Self {
            coordinator,
            transfer,
            config,
            session: Mutex::new(UploadSession::new()),
            source: Mutex::new(None),
            status_tx,
            reporter: Arc::new(ProgressReporter::new()),
            cancel: CancellationToken::new(),
            work_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Ordered stream of state changes, progress and retries. Ends after the
    /// terminal state.
    pub fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<UploadEvent> {
        self.reporter.subscribe()
    }

    /// Latest status, for observers that only care about the current state.
    pub fn watch_status(&self) -> tokio::sync::watch::Receiver<UploadStatus> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> UploadStatus {
        self.lock_session().status
    }

    pub fn progress(&self) -> u8 {
        self.reporter.percent()
    }

    pub fn snapshot(&self) -> UploadSession {
        self.lock_session().clone()
    }

    fn lock_session(&self) -> MutexGuard<'_, UploadSession> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition_locked(
        &self,
        session: &mut UploadSession,
        next: UploadStatus,
    ) -> Result<(), AppError> {
        let from = session.transition(next)?;
        self.publish_transition(session, from);
        Ok(())
    }

    fn fail_locked(&self, session: &mut UploadSession, err: AppError) -> Result<(), AppError> {
        let from = session.fail(err)?;
        self.publish_transition(session, from);
        Ok(())
    }

    fn publish_transition(&self, session: &UploadSession, from: UploadStatus) {
        let to = session.status;
        self.status_tx.send_replace(to);
        tracing::info!(session_id = %session.id, from = %from, to = %to, "Upload state changed");

        let event = UploadEvent::StateChanged { from, to };
        if to.is_terminal() {
            self.reporter.close_with(event);
        } else {
            self.reporter.emit(event);
        }
    }

    /// Fail the session with `err` unless it already reached a terminal state, then
    /// hand the error back.
    fn fail_with(&self, err: AppError) -> AppError {
        let mut session = self.lock_session();
        if !session.status.is_terminal() {
            let _ = self.fail_locked(&mut session, err.clone());
        }
        err
    }

    /// Validate the inputs, then obtain a destination from the coordination service.
    #[tracing::instrument(skip_all, fields(file = %file.name, size = file.size))]
    pub async fn initiate(
        &self,
        file: FileDescriptor,
        metadata: TargetMetadata,
        source: Arc<dyn ByteSource>,
    ) -> Result<Uuid, AppError> {
        let _work = self.work_lock.lock().await;

        {
            let mut session = self.lock_session();
            if self.cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            if session.status != UploadStatus::Idle {
                return Err(AppError::InvalidState(format!(
                    "initiate requires an idle session, current state is {}",
                    session.status
                )));
            }

            let validation = validate_file_descriptor(&file, &self.config)
                .and_then(|_| validate_target_metadata(&metadata))
                .and_then(|_| {
                    if source.len() == file.size {
                        Ok(())
                    } else {
                        Err(AppError::Validation(format!(
                            "source holds {} bytes but the file declares {}",
                            source.len(),
                            file.size
                        )))
                    }
                });
            if let Err(e) = validation {
                tracing::debug!(error = %e, "Upload rejected by validation");
                self.fail_locked(&mut session, e.clone())?;
                return Err(e);
            }

            session.file = Some(file.clone());
            session.metadata = Some(metadata.clone());
            self.transition_locked(&mut session, UploadStatus::Initiating)?;
        }
        *self
            .source
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(source);

        let grant = tokio::select! {
            _ = self.cancel.cancelled() => return Err(AppError::Cancelled),
            grant = self.coordinator.request_destination(&file, &metadata) => grant,
        };

        let grant = match grant {
            Ok(grant) => grant,
            Err(e) => {
                tracing::error!(error = %e, "Failed to obtain upload destination");
                return Err(self.fail_with(e));
            }
        };

        let mut session = self.lock_session();
        if session.status != UploadStatus::Initiating {
            return Err(AppError::Cancelled);
        }
        session.asset_id = Some(grant.asset_id);
        session.destination = Some(grant.destination);
        self.transition_locked(&mut session, UploadStatus::Transferring)?;
        tracing::info!(asset_id = %grant.asset_id, "Upload destination obtained");
        Ok(grant.asset_id)
    }

    /// Write the bytes, retrying transient failures from byte 0 with backoff.
    #[tracing::instrument(skip_all)]
    pub async fn transfer(&self) -> Result<(), AppError> {
        let _work = self.work_lock.lock().await;

        let (destination, total, asset_id) = {
            let session = self.lock_session();
            match (&session.status, &session.destination, &session.file) {
                (UploadStatus::Transferring, Some(dest), Some(file))
                    if !session.transfer_complete =>
                {
                    (dest.clone(), file.size, session.asset_id)
                }
                _ => {
                    return Err(AppError::InvalidState(format!(
                        "transfer requires a pending transfer, current state is {}",
                        session.status
                    )))
                }
            }
        };
        let source = self
            .source
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or_else(|| AppError::Internal("upload source missing".to_string()))?;

        let reporter = self.reporter.clone();
        let progress: ProgressFn = Arc::new(move |sent| {
            if let Some(percent) = reporter.advance(sent, total) {
                reporter.emit(UploadEvent::Progress {
                    percent,
                    transferred: sent.min(total),
                    total,
                });
            }
        });

        let max_attempts = self.config.max_retries + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.lock_session().attempts = attempt;

            let result = self
                .transfer
                .put(&destination, source.as_ref(), progress.clone(), &self.cancel)
                .await;

            let failure = match result {
                Ok(()) => {
                    progress(total);
                    let mut session = self.lock_session();
                    session.transferred_bytes = total;
                    session.transfer_complete = true;
                    tracing::info!(asset_id = ?asset_id, attempts = attempt, "Transfer complete");
                    return Ok(());
                }
                Err(TransferFailure::Cancelled) => return Err(AppError::Cancelled),
                Err(failure) => failure,
            };

            if !failure.is_transient() || attempt >= max_attempts {
                tracing::error!(
                    error = %failure,
                    attempt = attempt,
                    transient = failure.is_transient(),
                    "Transfer failed"
                );
                return Err(self.fail_with(failure.into_app_error(attempt)));
            }

            let delay = self.config.retry_delay(attempt);
            tracing::warn!(
                error = %failure,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                "Transfer failed, retrying from byte 0"
            );
            self.reporter.emit(UploadEvent::RetryScheduled {
                attempt: attempt + 1,
                delay_ms: delay.as_millis() as u64,
                reason: failure.to_string(),
            });

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(AppError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Report completion and move to `AwaitingProcessing`. Repeated or concurrent
    /// calls request processing at most once and return the current state.
    #[tracing::instrument(skip_all)]
    pub async fn finalize(&self) -> Result<UploadStatus, AppError> {
        let _work = self.work_lock.lock().await;

        let asset_id = {
            let mut session = self.lock_session();
            if session.finalize_requested {
                return Ok(session.status);
            }
            if self.cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            if session.status != UploadStatus::Transferring || !session.transfer_complete {
                return Err(AppError::InvalidState(format!(
                    "finalize requires a completed transfer, current state is {}",
                    session.status
                )));
            }
            let asset_id = session
                .asset_id
                .ok_or_else(|| AppError::Internal("asset id missing".to_string()))?;
            session.finalize_requested = true;
            self.transition_locked(&mut session, UploadStatus::AwaitingProcessing)?;
            asset_id
        };

        if let Err(e) = self.coordinator.notify_upload_complete(asset_id).await {
            tracing::error!(asset_id = %asset_id, error = %e, "Completion notification failed");
            return Err(self.fail_with(e));
        }

        tracing::info!(asset_id = %asset_id, "Processing requested");
        Ok(UploadStatus::AwaitingProcessing)
    }

    /// Abort the upload from any non-terminal state and move to `Failed(Cancelled)`.
    /// Returns once in-flight work has stopped; no progress or retry follows.
    ///
    /// The destination is released unless processing was already requested.
    #[tracing::instrument(skip_all)]
    pub async fn cancel(&self) -> Result<UploadStatus, AppError> {
        {
            let mut session = self.lock_session();
            if session.status.is_terminal() {
                return Err(AppError::InvalidState(format!(
                    "cannot cancel an upload in state {}",
                    session.status
                )));
            }
            if session.status == UploadStatus::Idle {
                self.cancel.cancel();
                self.fail_locked(&mut session, AppError::Cancelled)?;
                tracing::info!("Upload cancelled before it started");
                return Ok(session.status);
            }
        }

        self.cancel.cancel();
        let _work = self.work_lock.lock().await;

        let (asset_id, release) = {
            let mut session = self.lock_session();
            if session.status.is_terminal() {
                return Ok(session.status);
            }
            session.destination = None;
            (session.asset_id, !session.finalize_requested)
        };
        self.source
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        match asset_id {
            Some(asset_id) if release => {
                if let Err(e) = self.coordinator.release_destination(asset_id).await {
                    tracing::warn!(asset_id = %asset_id, error = %e, "Failed to release destination");
                }
            }
            _ => {}
        }

        let mut session = self.lock_session();
        if !session.status.is_terminal() {
            self.fail_locked(&mut session, AppError::Cancelled)?;
        }
        tracing::info!(asset_id = ?asset_id, "Upload cancelled");
        Ok(session.status)
    }

    /// Wait for processing to finish using `strategy`, then move to `Ready` or
    /// `Failed(ProcessingFailure)`.
    #[tracing::instrument(skip_all)]
    pub async fn wait_for_readiness(
        &self,
        strategy: &dyn ReadinessStrategy,
    ) -> Result<UploadOutcome, AppError> {
        let asset_id = {
            let session = self.lock_session();
            match (session.status, session.asset_id) {
                (UploadStatus::AwaitingProcessing, Some(id)) => id,
                (UploadStatus::Ready, Some(id)) => {
                    return Ok(UploadOutcome::Ready {
                        asset_id: id,
                        manifest_url: session.manifest_url.clone(),
                    })
                }
                (status, _) => {
                    return Err(AppError::InvalidState(format!(
                        "readiness wait requires AwaitingProcessing, current state is {}",
                        status
                    )))
                }
            }
        };

        let waited = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(AppError::Cancelled),
            waited = strategy.wait(asset_id, self.coordinator.as_ref()) => waited,
        };

        match waited {
            Ok(report) => {
                let mut session = self.lock_session();
                if self.cancel.is_cancelled() {
                    return Err(AppError::Cancelled);
                }
                session.manifest_url = report.manifest_url.clone();
                self.transition_locked(&mut session, UploadStatus::Ready)?;
                tracing::info!(asset_id = %asset_id, manifest_url = ?report.manifest_url, "Asset ready");
                Ok(UploadOutcome::Ready {
                    asset_id,
                    manifest_url: report.manifest_url,
                })
            }
            Err(e) => {
                tracing::error!(asset_id = %asset_id, error = %e, "Processing did not complete");
                Err(self.fail_with(e))
            }
        }
    }

    /// Run the whole pipeline and report how it ended.
    pub async fn run(
        &self,
        file: FileDescriptor,
        metadata: TargetMetadata,
        source: Arc<dyn ByteSource>,
        strategy: &dyn ReadinessStrategy,
    ) -> UploadOutcome {
        let result = async {
            self.initiate(file, metadata, source).await?;
            self.transfer().await?;
            self.finalize().await?;
            self.wait_for_readiness(strategy).await
        }
        .await;

        match result {
            Ok(outcome) => outcome,
            Err(AppError::Cancelled) => UploadOutcome::Cancelled,
            Err(e) => UploadOutcome::Failed(e),
        }
    }
}
