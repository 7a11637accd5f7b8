//! Upload input validation
//!
//! Checks the local file and the target metadata before anything is requested from
//! the coordination service:
//! - Content type: must be a `video/*` type on the configured allow-list
//! - Size: between 1 byte and the configured maximum
//! - Metadata: title/description/tag limits of the video schema

use validator::Validate;

use crate::config::UploadConfig;
use crate::error::AppError;
use crate::models::{FileDescriptor, TargetMetadata};

/// Maximum number of tags on a video
pub const MAX_TAGS: usize = 30;

/// Maximum length of a single tag (characters)
pub const MAX_TAG_LENGTH: usize = 50;

/// Validate the file against the upload configuration.
pub fn validate_file_descriptor(file: &FileDescriptor, config: &UploadConfig) -> Result<(), AppError> {
    if file.name.trim().is_empty() {
        return Err(AppError::Validation("File name cannot be empty".to_string()));
    }

    let media_type = file.media_type.trim().to_lowercase();
    if !media_type.starts_with("video/") {
        return Err(AppError::Validation(format!(
            "Please select a video file (got '{}')",
            file.media_type
        )));
    }
    if !config
        .allowed_content_types
        .iter()
        .any(|ct| ct.eq_ignore_ascii_case(&media_type))
    {
        return Err(AppError::Validation(format!(
            "Invalid content type '{}'. Allowed: {}",
            file.media_type,
            config.allowed_content_types.join(", ")
        )));
    }

    if file.size == 0 {
        return Err(AppError::Validation("File is empty".to_string()));
    }
    if file.size > config.max_upload_size_bytes {
        return Err(AppError::Validation(format!(
            "File size exceeds maximum allowed size of {} MB",
            config.max_upload_size_bytes / 1024 / 1024
        )));
    }

    Ok(())
}

/// Validate title, description and tags.
pub fn validate_target_metadata(metadata: &TargetMetadata) -> Result<(), AppError> {
    metadata.validate()?;

    if metadata.title.trim().is_empty() {
        return Err(AppError::Validation("Title cannot be blank".to_string()));
    }
    if metadata.tags.len() > MAX_TAGS {
        return Err(AppError::Validation(format!(
            "At most {} tags are allowed",
            MAX_TAGS
        )));
    }
    for tag in &metadata.tags {
        let len = tag.chars().count();
        if len == 0 || len > MAX_TAG_LENGTH {
            return Err(AppError::Validation(format!(
                "Tag '{}' must be between 1 and {} characters",
                tag, MAX_TAG_LENGTH
            )));
        }
    }
    Ok(())
}

/// Split a comma-separated tag string, trimming whitespace and dropping empty entries.
pub fn parse_tags(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
