use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;

/// The local file being uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Original filename
    pub name: String,
    /// File size in bytes
    pub size: u64,
    /// Declared content type (MIME type), sent verbatim as the PUT content type
    pub media_type: String,
}

impl FileDescriptor {
    pub fn new(name: impl Into<String>, size: u64, media_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size,
            media_type: media_type.into(),
        }
    }

    /// Filename without its extension, used as the default title.
    pub fn default_title(&self) -> String {
        match self.name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem.to_string(),
            _ => self.name.clone(),
        }
    }
}

/// Where the uploaded video should be published.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TargetMetadata {
    pub channel_id: Uuid,
    #[validate(length(min = 1, max = 100, message = "Title must be between 1 and 100 characters"))]
    pub title: String,
    #[validate(length(max = 5000, message = "Description must be at most 5000 characters"))]
    pub description: Option<String>,
    /// Count and length limits are checked by `validate_target_metadata`
    pub tags: Vec<String>,
}

/// A one-shot, pre-authorized write target.
#[derive(Clone, Serialize, Deserialize)]
pub struct UploadDestination {
    pub url: String,
    /// Headers the PUT must carry; always includes `Content-Type`
    pub headers: BTreeMap<String, String>,
    pub expires_at: DateTime<Utc>,
}

impl UploadDestination {
    /// Fails with `Coordination` when `expires_in_secs` does not fit a timestamp.
    pub fn new(
        url: impl Into<String>,
        media_type: &str,
        extra_headers: impl IntoIterator<Item = (String, String)>,
        expires_in_secs: u64,
    ) -> Result<Self, AppError> {
        let expires_at = i64::try_from(expires_in_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .ok_or_else(|| {
                AppError::Coordination(format!(
                    "upload destination expiry of {}s is out of range",
                    expires_in_secs
                ))
            })?;

        let mut headers: BTreeMap<String, String> = extra_headers
            .into_iter()
            .filter(|(k, _)| !k.eq_ignore_ascii_case("content-type"))
            .collect();
        headers.insert("Content-Type".to_string(), media_type.to_string());
        Ok(Self {
            url: url.into(),
            headers,
            expires_at,
        })
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

// The URL carries a signature; keep it out of logs.
impl std::fmt::Debug for UploadDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted = self.url.split('?').next().unwrap_or_default();
        f.debug_struct("UploadDestination")
            .field("url", &redacted)
            .field("headers", &self.headers)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Why an upload ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Validation,
    Transfer,
    Cancelled,
    ProcessingFailure,
    Coordination,
}

impl FailureReason {
    pub fn from_error(err: &AppError) -> Self {
        match err {
            AppError::Validation(_) => FailureReason::Validation,
            AppError::Transfer { .. } => FailureReason::Transfer,
            AppError::Cancelled => FailureReason::Cancelled,
            AppError::ProcessingFailure(_) => FailureReason::ProcessingFailure,
            _ => FailureReason::Coordination,
        }
    }
}

/// Upload lifecycle. Forward-only; `Failed` is reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum UploadStatus {
    Idle,
    Initiating,
    Transferring,
    AwaitingProcessing,
    Ready,
    Failed(FailureReason),
}

impl UploadStatus {
    fn rank(&self) -> u8 {
        match self {
            UploadStatus::Idle => 0,
            UploadStatus::Initiating => 1,
            UploadStatus::Transferring => 2,
            UploadStatus::AwaitingProcessing => 3,
            UploadStatus::Ready => 4,
            UploadStatus::Failed(_) => 5,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadStatus::Ready | UploadStatus::Failed(_))
    }

    /// Only the next state in the pipeline, or `Failed` from a non-terminal state.
    pub fn can_transition_to(&self, next: UploadStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            UploadStatus::Failed(_) => true,
            _ => next.rank() == self.rank() + 1,
        }
    }
}

impl Display for UploadStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            UploadStatus::Idle => write!(f, "idle"),
            UploadStatus::Initiating => write!(f, "initiating"),
            UploadStatus::Transferring => write!(f, "transferring"),
            UploadStatus::AwaitingProcessing => write!(f, "awaiting_processing"),
            UploadStatus::Ready => write!(f, "ready"),
            UploadStatus::Failed(reason) => write!(f, "failed({:?})", reason),
        }
    }
}

/// State of one upload, owned by the orchestrator for its whole lifetime.
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub id: Uuid,
    /// Asset (video) id assigned by the coordination service
    pub asset_id: Option<Uuid>,
    pub file: Option<FileDescriptor>,
    pub metadata: Option<TargetMetadata>,
    /// Dropped when the destination is released
    pub destination: Option<UploadDestination>,
    pub status: UploadStatus,
    pub transferred_bytes: u64,
    pub transfer_complete: bool,
    /// Transfer attempts made so far (first attempt included)
    pub attempts: u32,
    pub last_error: Option<AppError>,
    pub finalize_requested: bool,
    pub manifest_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Default for UploadSession {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            asset_id: None,
            file: None,
            metadata: None,
            destination: None,
            status: UploadStatus::Idle,
            transferred_bytes: 0,
            transfer_complete: false,
            attempts: 0,
            last_error: None,
            finalize_requested: false,
            manifest_url: None,
            created_at: Utc::now(),
        }
    }

    /// Move to `next`, rejecting backward or skipping transitions.
    pub fn transition(&mut self, next: UploadStatus) -> Result<UploadStatus, AppError> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        let previous = self.status;
        self.status = next;
        Ok(previous)
    }

    /// Move to `Failed` with the reason derived from `err`, recording the error.
    pub fn fail(&mut self, err: AppError) -> Result<UploadStatus, AppError> {
        let previous = self.transition(UploadStatus::Failed(FailureReason::from_error(&err)))?;
        self.last_error = Some(err);
        Ok(previous)
    }
}

/// Notifications published by the upload orchestrator, in the order they occur.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UploadEvent {
    StateChanged {
        from: UploadStatus,
        to: UploadStatus,
    },
    Progress {
        percent: u8,
        transferred: u64,
        total: u64,
    },
    RetryScheduled {
        attempt: u32,
        delay_ms: u64,
        reason: String,
    },
}

/// Final result of an upload as seen by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Ready {
        asset_id: Uuid,
        manifest_url: Option<String>,
    },
    Cancelled,
    Failed(AppError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_only_transitions() {
        let mut session = UploadSession::new();
        assert!(session.transition(UploadStatus::Initiating).is_ok());
        assert!(session.transition(UploadStatus::Transferring).is_ok());
        assert!(matches!(
            session.transition(UploadStatus::Initiating),
            Err(AppError::InvalidTransition { .. })
        ));
        assert_eq!(session.status, UploadStatus::Transferring);
    }

    #[test]
    fn test_skipping_states_is_rejected() {
        let mut session = UploadSession::new();
        assert!(session.transition(UploadStatus::Transferring).is_err());
        assert!(session.transition(UploadStatus::Ready).is_err());
        assert_eq!(session.status, UploadStatus::Idle);
    }

    #[test]
    fn test_failed_is_reachable_from_any_non_terminal_state() {
        for steps in 0..4 {
            let mut session = UploadSession::new();
            let pipeline = [
                UploadStatus::Initiating,
                UploadStatus::Transferring,
                UploadStatus::AwaitingProcessing,
            ];
            for next in pipeline.iter().take(steps.min(3)) {
                session.transition(*next).unwrap();
            }
            session.fail(AppError::Cancelled).unwrap();
            assert_eq!(
                session.status,
                UploadStatus::Failed(FailureReason::Cancelled)
            );
            assert_eq!(session.last_error, Some(AppError::Cancelled));
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut session = UploadSession::new();
        session.fail(AppError::Validation("bad".into())).unwrap();
        assert!(session.fail(AppError::Cancelled).is_err());
        assert!(session.transition(UploadStatus::Initiating).is_err());
    }

    #[test]
    fn test_destination_always_carries_media_type() {
        let dest = UploadDestination::new(
            "http://store/put?X-Amz-Signature=abc",
            "video/mp4",
            vec![
                ("content-type".to_string(), "application/octet-stream".to_string()),
                ("x-amz-acl".to_string(), "private".to_string()),
            ],
            3600,
        )
        .unwrap();
        assert_eq!(dest.headers.get("Content-Type").unwrap(), "video/mp4");
        assert!(!dest.headers.contains_key("content-type"));
        assert!(!dest.is_expired());
        assert!(!format!("{:?}", dest).contains("Signature"));
    }

    #[test]
    fn test_destination_rejects_unrepresentable_expiry() {
        for expires_in in [u64::MAX, 1 << 62, i64::MAX as u64] {
            let result = UploadDestination::new("http://store/put", "video/mp4", Vec::new(), expires_in);
            assert!(matches!(result, Err(AppError::Coordination(_))));
        }
        let zero = UploadDestination::new("http://store/put", "video/mp4", Vec::new(), 0).unwrap();
        assert!(zero.is_expired());
    }

    #[test]
    fn test_default_title_strips_extension() {
        assert_eq!(FileDescriptor::new("trip.final.mp4", 1, "video/mp4").default_title(), "trip.final");
        assert_eq!(FileDescriptor::new("noext", 1, "video/mp4").default_title(), "noext");
    }
}
