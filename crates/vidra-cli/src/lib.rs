use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use vidra_core::models::UploadOutcome;
use vidra_core::ErrorMetadata;

/// Initialize tracing for the CLI.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

pub fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize response")?;
    println!("{}", out);
    Ok(())
}

/// Media type for a local file, from its extension.
pub fn guess_media_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let media_type = match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        "mpeg" | "mpg" => "video/mpeg",
        _ => return None,
    };
    Some(media_type)
}

pub fn outcome_json(outcome: &UploadOutcome) -> serde_json::Value {
    match outcome {
        UploadOutcome::Ready {
            asset_id,
            manifest_url,
        } => serde_json::json!({
            "status": "ready",
            "video_id": asset_id,
            "manifest_url": manifest_url,
        }),
        UploadOutcome::Cancelled => serde_json::json!({ "status": "cancelled" }),
        UploadOutcome::Failed(err) => serde_json::json!({
            "status": "failed",
            "error_code": err.error_code(),
            "error": err.to_string(),
        }),
    }
}
