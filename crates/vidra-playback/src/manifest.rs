//! HLS master/media playlist resolution.

use std::sync::Arc;

use futures::future::try_join_all;
use hls_m3u8::tags::VariantStream as HlsVariantStream;
use hls_m3u8::{MasterPlaylist as HlsMasterPlaylist, MediaPlaylist as HlsMediaPlaylist};
use url::Url;
use vidra_core::models::{MediaAsset, Resolution, Segment, Variant};
use vidra_core::AppError;

use crate::fetch::SegmentFetcher;

/// A variant as declared in the master playlist, before its media playlist is read.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclaredVariant {
    pub bitrate_bps: u64,
    pub resolution: Option<Resolution>,
    pub codecs: Option<String>,
    pub playlist_url: Url,
}

fn decode(data: &[u8]) -> Result<&str, AppError> {
    let text = std::str::from_utf8(data)
        .map_err(|e| AppError::ManifestParse(format!("playlist is not UTF-8: {}", e)))?;
    let text = text.trim_start_matches('\u{feff}');
    if !text.trim_start().starts_with("#EXTM3U") {
        return Err(AppError::ManifestParse(
            "missing #EXTM3U header".to_string(),
        ));
    }
    Ok(text)
}

/// Parse a master playlist, resolving variant URIs against `base`. Variants come back
/// ascending by bitrate; a repeated bitrate keeps the first declaration.
pub fn parse_master_playlist(data: &[u8], base: &Url) -> Result<Vec<DeclaredVariant>, AppError> {
    let text = decode(data)?;
    if !text.contains("#EXT-X-STREAM-INF") {
        return Err(AppError::NoVariants);
    }

    let master = HlsMasterPlaylist::try_from(text)
        .map_err(|e| AppError::ManifestParse(e.to_string()))?
        .into_owned();

    let mut variants = Vec::new();
    for stream in master.variant_streams.iter() {
        // I-frame playlists are trick-play renditions, not playable variants
        let HlsVariantStream::ExtXStreamInf {
            uri, stream_data, ..
        } = stream
        else {
            continue;
        };
        variants.push(DeclaredVariant {
            bitrate_bps: stream_data.bandwidth(),
            resolution: stream_data.resolution().map(|r| Resolution {
                width: r.width() as u64,
                height: r.height() as u64,
            }),
            codecs: stream_data.codecs().map(|c| c.to_string()),
            playlist_url: base.join(&*uri)?,
        });
    }

    if variants.is_empty() {
        return Err(AppError::NoVariants);
    }

    // stable sort keeps declaration order among equal bitrates
    variants.sort_by_key(|v| v.bitrate_bps);
    let declared = variants.len();
    variants.dedup_by_key(|v| v.bitrate_bps);
    if variants.len() != declared {
        tracing::warn!(
            declared,
            kept = variants.len(),
            "Dropped variants with duplicate bitrates"
        );
    }
    Ok(variants)
}

/// Parse a media playlist into timed segments with absolute URLs.
pub fn parse_media_playlist(data: &[u8], base: &Url) -> Result<Vec<Segment>, AppError> {
    let text = decode(data)?;
    let media = HlsMediaPlaylist::try_from(text)
        .map_err(|e| AppError::ManifestParse(e.to_string()))?
        .into_owned();

    let mut start = 0.0;
    let mut segments = Vec::new();
    for (index, (_, seg)) in media.segments.iter().enumerate() {
        let duration = seg.duration.duration().as_secs_f64();
        segments.push(Segment {
            index,
            start,
            duration,
            url: base.join(&*seg.uri())?,
        });
        start += duration;
    }
    Ok(segments)
}

/// Turns a master playlist URL into a [`MediaAsset`].
#[derive(Clone)]
pub struct ManifestResolver {
    fetcher: Arc<dyn SegmentFetcher>,
}

impl ManifestResolver {
    pub fn new(fetcher: Arc<dyn SegmentFetcher>) -> Self {
        Self { fetcher }
    }

    async fn fetch(&self, url: &Url) -> Result<bytes::Bytes, AppError> {
        self.fetcher
            .fetch(url)
            .await
            .map_err(|e| AppError::ManifestFetch(format!("{}: {}", url, e)))
    }

    #[tracing::instrument(skip(self), fields(manifest_url = %manifest_url))]
    pub async fn resolve(&self, manifest_url: &Url) -> Result<MediaAsset, AppError> {
        let master = self.fetch(manifest_url).await?;
        let declared = parse_master_playlist(&master, manifest_url)?;

        let variants = try_join_all(declared.into_iter().map(|d| async move {
            let body = self.fetch(&d.playlist_url).await?;
            let segments = parse_media_playlist(&body, &d.playlist_url)?;
            if segments.is_empty() {
                return Err(AppError::ManifestParse(format!(
                    "variant {} has no segments",
                    d.playlist_url
                )));
            }
            Ok(Variant {
                index: 0,
                bitrate_bps: d.bitrate_bps,
                resolution: d.resolution,
                codecs: d.codecs,
                playlist_url: d.playlist_url,
                segments,
            })
        }))
        .await?;

        let asset = MediaAsset::new(manifest_url.as_str(), variants)?;
        tracing::info!(
            variants = asset.variants().len(),
            duration_secs = asset.duration,
            "Manifest resolved"
        );
        Ok(asset)
    }
}
