//! Configuration module
//!
//! This module provides configuration structures for the upload orchestrator and the
//! playback engine. Values are read from the environment (after loading `.env`) with
//! defaults for everything, so an empty environment yields a usable configuration.

use std::env;
use std::time::Duration;

// Upload defaults
const MAX_UPLOAD_SIZE_MB: u64 = 5120;
const UPLOAD_MAX_RETRIES: u32 = 3;
const UPLOAD_RETRY_BASE_DELAY_MS: u64 = 500;
const UPLOAD_RETRY_MAX_DELAY_MS: u64 = 30_000;
const UPLOAD_TIMEOUT_SECS: u64 = 3600;
const READINESS_POLL_INTERVAL_SECS: u64 = 5;
const READINESS_TIMEOUT_SECS: u64 = 1800;
const VIDEO_ALLOWED_CONTENT_TYPES: &str =
    "video/mp4,video/quicktime,video/x-msvideo,video/webm,video/x-matroska";

// Playback defaults
const MAX_BUFFER_SECS: f64 = 30.0;
const MAX_BUFFER_MB: u64 = 60;
const START_BUFFER_SECS: f64 = 4.0;
const LOW_WATERMARK_SECS: f64 = 5.0;
const MAX_CONCURRENT_FETCHES: usize = 3;
const ABR_SAFETY_RATIO: f64 = 0.85;
const SEGMENT_RETRY_BASE_DELAY_MS: u64 = 500;
const SEGMENT_RETRY_MAX_DELAY_MS: u64 = 8000;
const SEGMENT_TIMEOUT_SECS: u64 = 20;
const PLAYBACK_TICK_MS: u64 = 250;

/// Settings for the upload orchestrator and transfer client.
#[derive(Clone, Debug)]
pub struct UploadConfig {
    pub max_upload_size_bytes: u64,
    pub allowed_content_types: Vec<String>,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub transfer_timeout: Duration,
    pub readiness_poll_interval: Duration,
    pub readiness_timeout: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_upload_size_bytes: MAX_UPLOAD_SIZE_MB * 1024 * 1024,
            allowed_content_types: split_list(VIDEO_ALLOWED_CONTENT_TYPES),
            max_retries: UPLOAD_MAX_RETRIES,
            retry_base_delay: Duration::from_millis(UPLOAD_RETRY_BASE_DELAY_MS),
            retry_max_delay: Duration::from_millis(UPLOAD_RETRY_MAX_DELAY_MS),
            transfer_timeout: Duration::from_secs(UPLOAD_TIMEOUT_SECS),
            readiness_poll_interval: Duration::from_secs(READINESS_POLL_INTERVAL_SECS),
            readiness_timeout: Duration::from_secs(READINESS_TIMEOUT_SECS),
        }
    }
}

impl UploadConfig {
    /// Backoff before retry number `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        exponential_backoff(self.retry_base_delay, self.retry_max_delay, attempt)
    }
}

/// Settings for the playback engine and its ABR controller.
#[derive(Clone, Debug)]
pub struct PlaybackConfig {
    /// Upper bound of media time buffered ahead of the playback position.
    pub max_buffer_secs: f64,
    /// Upper bound of segment bytes held ahead of the playback position.
    pub max_buffer_bytes: u64,
    /// Buffered time required before leaving Buffering/Stalled for Playing.
    pub start_buffer_secs: f64,
    /// Buffered time below which the ABR controller downgrades regardless of throughput.
    pub low_watermark_secs: f64,
    pub max_concurrent_fetches: usize,
    /// Fraction of the throughput estimate a variant bitrate may use.
    pub abr_safety_ratio: f64,
    pub initial_estimate_bps: Option<u64>,
    pub segment_retry_base_delay: Duration,
    pub segment_retry_max_delay: Duration,
    pub segment_timeout: Duration,
    /// Idle interval of the engine loop when there is nothing to fetch.
    pub tick_interval: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            max_buffer_secs: MAX_BUFFER_SECS,
            max_buffer_bytes: MAX_BUFFER_MB * 1000 * 1000,
            start_buffer_secs: START_BUFFER_SECS,
            low_watermark_secs: LOW_WATERMARK_SECS,
            max_concurrent_fetches: MAX_CONCURRENT_FETCHES,
            abr_safety_ratio: ABR_SAFETY_RATIO,
            initial_estimate_bps: None,
            segment_retry_base_delay: Duration::from_millis(SEGMENT_RETRY_BASE_DELAY_MS),
            segment_retry_max_delay: Duration::from_millis(SEGMENT_RETRY_MAX_DELAY_MS),
            segment_timeout: Duration::from_secs(SEGMENT_TIMEOUT_SECS),
            tick_interval: Duration::from_millis(PLAYBACK_TICK_MS),
        }
    }
}

impl PlaybackConfig {
    /// Backoff before stalled retry number `attempt` (1-based).
    pub fn segment_retry_delay(&self, attempt: u32) -> Duration {
        exponential_backoff(
            self.segment_retry_base_delay,
            self.segment_retry_max_delay,
            attempt,
        )
    }
}

/// Application configuration.
#[derive(Clone, Debug, Default)]
pub struct Config {
    pub environment: String,
    pub upload: UploadConfig,
    pub playback: PlaybackConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let upload = UploadConfig {
            max_upload_size_bytes: env_parse("MAX_UPLOAD_SIZE_MB", MAX_UPLOAD_SIZE_MB)
                * 1024
                * 1024,
            allowed_content_types: env::var("VIDEO_ALLOWED_CONTENT_TYPES")
                .map(|s| split_list(&s))
                .unwrap_or_else(|_| split_list(VIDEO_ALLOWED_CONTENT_TYPES)),
            max_retries: env_parse("UPLOAD_MAX_RETRIES", UPLOAD_MAX_RETRIES),
            retry_base_delay: Duration::from_millis(env_parse(
                "UPLOAD_RETRY_BASE_DELAY_MS",
                UPLOAD_RETRY_BASE_DELAY_MS,
            )),
            retry_max_delay: Duration::from_millis(env_parse(
                "UPLOAD_RETRY_MAX_DELAY_MS",
                UPLOAD_RETRY_MAX_DELAY_MS,
            )),
            transfer_timeout: Duration::from_secs(env_parse(
                "UPLOAD_TIMEOUT_SECS",
                UPLOAD_TIMEOUT_SECS,
            )),
            readiness_poll_interval: Duration::from_secs(env_parse(
                "READINESS_POLL_INTERVAL_SECS",
                READINESS_POLL_INTERVAL_SECS,
            )),
            readiness_timeout: Duration::from_secs(env_parse(
                "READINESS_TIMEOUT_SECS",
                READINESS_TIMEOUT_SECS,
            )),
        };

        let playback = PlaybackConfig {
            max_buffer_secs: env_parse("PLAYBACK_MAX_BUFFER_SECS", MAX_BUFFER_SECS),
            max_buffer_bytes: env_parse("PLAYBACK_MAX_BUFFER_MB", MAX_BUFFER_MB) * 1000 * 1000,
            start_buffer_secs: env_parse("PLAYBACK_START_BUFFER_SECS", START_BUFFER_SECS),
            low_watermark_secs: env_parse("PLAYBACK_LOW_WATERMARK_SECS", LOW_WATERMARK_SECS),
            max_concurrent_fetches: env_parse(
                "PLAYBACK_MAX_CONCURRENT_FETCHES",
                MAX_CONCURRENT_FETCHES,
            ),
            abr_safety_ratio: env_parse("ABR_SAFETY_RATIO", ABR_SAFETY_RATIO),
            initial_estimate_bps: env::var("ABR_INITIAL_ESTIMATE_KBPS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(|kbps| kbps * 1000),
            segment_retry_base_delay: Duration::from_millis(env_parse(
                "SEGMENT_RETRY_BASE_DELAY_MS",
                SEGMENT_RETRY_BASE_DELAY_MS,
            )),
            segment_retry_max_delay: Duration::from_millis(env_parse(
                "SEGMENT_RETRY_MAX_DELAY_MS",
                SEGMENT_RETRY_MAX_DELAY_MS,
            )),
            segment_timeout: Duration::from_secs(env_parse(
                "SEGMENT_TIMEOUT_SECS",
                SEGMENT_TIMEOUT_SECS,
            )),
            tick_interval: Duration::from_millis(env_parse("PLAYBACK_TICK_MS", PLAYBACK_TICK_MS)),
        };

        let config = Config {
            environment,
            upload,
            playback,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        let environment = self.environment.to_lowercase();
        environment == "production" || environment == "prod"
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.upload.max_upload_size_bytes == 0 {
            return Err(anyhow::anyhow!("MAX_UPLOAD_SIZE_MB must be greater than 0"));
        }
        if self.upload.allowed_content_types.is_empty() {
            return Err(anyhow::anyhow!(
                "VIDEO_ALLOWED_CONTENT_TYPES must list at least one type"
            ));
        }
        if let Some(bad) = self
            .upload
            .allowed_content_types
            .iter()
            .find(|t| !t.starts_with("video/"))
        {
            return Err(anyhow::anyhow!(
                "VIDEO_ALLOWED_CONTENT_TYPES may only contain video types, got '{}'",
                bad
            ));
        }
        if self.upload.retry_base_delay > self.upload.retry_max_delay {
            return Err(anyhow::anyhow!(
                "UPLOAD_RETRY_BASE_DELAY_MS cannot exceed UPLOAD_RETRY_MAX_DELAY_MS"
            ));
        }

        let p = &self.playback;
        if p.max_buffer_secs <= 0.0 {
            return Err(anyhow::anyhow!("PLAYBACK_MAX_BUFFER_SECS must be positive"));
        }
        if p.low_watermark_secs < 0.0 || p.low_watermark_secs >= p.max_buffer_secs {
            return Err(anyhow::anyhow!(
                "PLAYBACK_LOW_WATERMARK_SECS must be in [0, PLAYBACK_MAX_BUFFER_SECS)"
            ));
        }
        if p.start_buffer_secs > p.max_buffer_secs {
            return Err(anyhow::anyhow!(
                "PLAYBACK_START_BUFFER_SECS cannot exceed PLAYBACK_MAX_BUFFER_SECS"
            ));
        }
        if p.max_buffer_bytes == 0 {
            return Err(anyhow::anyhow!("PLAYBACK_MAX_BUFFER_MB must be greater than 0"));
        }
        if p.max_concurrent_fetches == 0 {
            return Err(anyhow::anyhow!(
                "PLAYBACK_MAX_CONCURRENT_FETCHES must be at least 1"
            ));
        }
        if !(p.abr_safety_ratio > 0.0 && p.abr_safety_ratio <= 1.0) {
            return Err(anyhow::anyhow!("ABR_SAFETY_RATIO must be in (0, 1]"));
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    let Ok(raw) = env::var(key) else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparsable value, using default");
            default
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn exponential_backoff(base: Duration, max: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(20);
    base.saturating_mul(2_u32.pow(exponent)).min(max)
}
