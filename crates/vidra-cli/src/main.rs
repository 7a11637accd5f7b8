//! Vidra CLI: upload a video, check its processing status, or play an HLS asset.
//!
//! Set VIDRA_API_TOKEN (Bearer) or VIDRA_API_KEY (X-API-Key) and VIDRA_API_URL (or
//! API_URL) for the upload and status commands.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use url::Url;
use uuid::Uuid;
use vidra_api_client::ApiClient;
use vidra_cli::{guess_media_type, init_tracing, outcome_json, print_json};
use vidra_core::models::{FileDescriptor, PlaybackEvent, TargetMetadata, UploadEvent, UploadOutcome};
use vidra_core::validation::parse_tags;
use vidra_core::{AppError, Config};
use vidra_playback::{ClockSurface, HttpFetcher, PlaybackEngine, RenderingSurface};
use vidra_upload::{ByteSource, FileSource, HttpTransferClient, PollingReadiness, UploadOrchestrator};

#[derive(Parser)]
#[command(name = "vidra", about = "Vidra upload and playback CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a video file
    Upload {
        /// Path to the video file
        file: PathBuf,
        /// Channel UUID to publish into
        #[arg(long)]
        channel: Uuid,
        /// Title (defaults to the file name without extension)
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Comma-separated tags
        #[arg(long)]
        tags: Option<String>,
        /// Override the media type guessed from the extension
        #[arg(long)]
        content_type: Option<String>,
        /// Wait until processing finishes
        #[arg(long)]
        wait: bool,
    },
    /// Get the processing status of a video
    Status {
        /// Video UUID
        video_id: Uuid,
    },
    /// Play an HLS master playlist, discarding the media
    Play {
        manifest_url: Url,
        /// Stop after this many seconds of wall-clock time
        #[arg(long, default_value = "30")]
        seconds: u64,
        /// Playback speed relative to real time
        #[arg(long, default_value = "1.0")]
        speed: f64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::debug!(
        environment = %config.environment,
        production = config.is_production(),
        "Configuration loaded"
    );

    let cli = Cli::parse();

    match cli.command {
        Commands::Upload {
            file,
            channel,
            title,
            description,
            tags,
            content_type,
            wait,
        } => {
            let metadata = |descriptor: &FileDescriptor| TargetMetadata {
                channel_id: channel,
                title: title.clone().unwrap_or_else(|| descriptor.default_title()),
                description: description.clone(),
                tags: tags.as_deref().map(parse_tags).unwrap_or_default(),
            };
            upload(config, file, content_type, metadata, wait).await?;
        }
        Commands::Status { video_id } => {
            let client = api_client()?;
            let response = client.get_video(video_id).await?;
            print_json(&response)?;
        }
        Commands::Play {
            manifest_url,
            seconds,
            speed,
        } => {
            play(config, manifest_url, Duration::from_secs(seconds), speed).await?;
        }
    }

    Ok(())
}

fn api_client() -> anyhow::Result<ApiClient> {
    ApiClient::from_env().context(
        "Failed to create API client. Set VIDRA_API_TOKEN or VIDRA_API_KEY and VIDRA_API_URL (or API_URL)",
    )
}

async fn upload(
    config: Config,
    path: PathBuf,
    content_type: Option<String>,
    metadata: impl Fn(&FileDescriptor) -> TargetMetadata,
    wait: bool,
) -> anyhow::Result<()> {
    let source = FileSource::new(&path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let media_type = content_type
        .or_else(|| guess_media_type(&path).map(str::to_string))
        .context("Unknown media type; pass --content-type")?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let descriptor = FileDescriptor::new(name, source.len(), media_type);
    let metadata = metadata(&descriptor);

    let client = api_client()?;
    let transfer = HttpTransferClient::new(config.upload.transfer_timeout)?;
    let readiness = PollingReadiness::from_config(&config.upload);
    let orchestrator = Arc::new(UploadOrchestrator::new(
        Arc::new(client),
        Arc::new(transfer),
        config.upload,
    ));

    let mut events = orchestrator.subscribe();
    let reporter = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                UploadEvent::Progress {
                    percent,
                    transferred,
                    total,
                } => tracing::info!(percent, transferred, total, "Upload progress"),
                UploadEvent::RetryScheduled {
                    attempt,
                    delay_ms,
                    reason,
                } => tracing::warn!(attempt, delay_ms, reason = %reason, "Retrying transfer"),
                UploadEvent::StateChanged { .. } => {}
            }
        }
    });

    let mut runner = {
        let orchestrator = orchestrator.clone();
        let source = Arc::new(source);
        tokio::spawn(async move {
            if wait {
                return orchestrator
                    .run(descriptor, metadata, source, &readiness)
                    .await;
            }
            let submitted = async {
                let video_id = orchestrator.initiate(descriptor, metadata, source).await?;
                orchestrator.transfer().await?;
                orchestrator.finalize().await?;
                Ok::<Uuid, AppError>(video_id)
            }
            .await;
            match submitted {
                Ok(video_id) => UploadOutcome::Ready {
                    asset_id: video_id,
                    manifest_url: None,
                },
                Err(AppError::Cancelled) => UploadOutcome::Cancelled,
                Err(e) => UploadOutcome::Failed(e),
            }
        })
    };

    let outcome = tokio::select! {
        joined = &mut runner => joined,
        _ = tokio::signal::ctrl_c() => {
            match orchestrator.cancel().await {
                Ok(status) => tracing::info!(status = %status, "Upload cancelled"),
                Err(e) => {
                    tracing::warn!(error = %e, "Upload can no longer be cancelled, stopping");
                    runner.abort();
                }
            }
            runner.await
        }
    }
    .context("Upload task failed")?;

    let mut summary = outcome_json(&outcome);
    if !wait {
        if let UploadOutcome::Ready { .. } = outcome {
            summary["status"] = serde_json::json!(orchestrator.status().to_string());
        }
    }
    // a non-terminal upload keeps the event stream open until the orchestrator is dropped
    drop(orchestrator);
    let _ = reporter.await;
    print_json(&summary)?;
    Ok(())
}

async fn play(
    config: Config,
    manifest_url: Url,
    duration: Duration,
    speed: f64,
) -> anyhow::Result<()> {
    let fetcher = HttpFetcher::new(config.playback.segment_timeout)?;
    let mut engine = PlaybackEngine::new(
        config.playback,
        Arc::new(fetcher),
        ClockSurface::new().with_speed(speed),
    );

    let mut events = engine.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if matches!(event, PlaybackEvent::SegmentAppended { .. }) {
                continue;
            }
            if let Ok(line) = serde_json::to_string(&event) {
                println!("{}", line);
            }
        }
    });

    engine.load(manifest_url).await?;

    let deadline = tokio::time::Instant::now() + duration;
    while tokio::time::Instant::now() < deadline {
        if engine.tick().await.is_terminal() {
            break;
        }
    }

    let label = engine
        .asset()
        .and_then(|a| a.variant(engine.current_variant()))
        .map(|v| v.label());
    let summary = serde_json::json!({
        "state": engine.state().to_string(),
        "variant": label,
        "position_secs": engine.surface().position(),
        "estimate_bps": engine.session().estimate_bps,
        "stalls": engine.session().consecutive_stalls,
        "bytes": engine.surface().appended_bytes(),
    });
    drop(engine);
    let _ = printer.await;

    print_json(&summary)?;
    Ok(())
}
