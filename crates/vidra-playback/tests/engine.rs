use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_test::assert_ok;
use url::Url;
use vidra_core::models::{PlaybackEvent, PlaybackState, Segment, SwitchReason};
use vidra_core::{AppError, PlaybackConfig};
use vidra_playback::{
    ClockSurface, FetchError, FixedEstimate, PlaybackCommand, PlaybackEngine, RenderingSurface,
    SegmentFetcher, ThroughputEstimator,
};

const SEGMENT_BYTES: usize = 20_000;
const MASTER: &str = "http://cdn.test/v/master.m3u8";

enum Reply {
    Delayed(Duration),
    Fail(FetchError),
}

/// Serves registered playlists and scripted segment replies. Unscripted `.ts` URLs
/// succeed with `SEGMENT_BYTES` bytes; any other unknown URL is a 404.
#[derive(Default)]
struct MockFetcher {
    bodies: Mutex<HashMap<String, String>>,
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    log: Mutex<Vec<String>>,
}

impl MockFetcher {
    fn serve(&self, url: &str, body: String) {
        self.bodies.lock().unwrap().insert(url.to_string(), body);
    }

    fn script(&self, url: &str, reply: Reply) {
        self.scripts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(reply);
    }

    fn segment_requests(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.ends_with(".ts"))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SegmentFetcher for MockFetcher {
    async fn fetch(&self, url: &Url) -> Result<Bytes, FetchError> {
        let key = url.to_string();
        self.log.lock().unwrap().push(key.clone());

        if let Some(body) = self.bodies.lock().unwrap().get(&key) {
            return Ok(Bytes::from(body.clone()));
        }
        let reply = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(|q| q.pop_front());
        match reply {
            Some(Reply::Fail(e)) => Err(e),
            Some(Reply::Delayed(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(Bytes::from(vec![0u8; SEGMENT_BYTES]))
            }
            None if key.ends_with(".ts") => Ok(Bytes::from(vec![0u8; SEGMENT_BYTES])),
            None => Err(FetchError::HttpStatus {
                status: 404,
                url: key,
            }),
        }
    }
}

/// One link shared by every segment fetch: segments are served one at a time, each
/// taking `per_segment`. Playlists come from `playlists` without touching the link.
struct SharedLinkFetcher {
    playlists: MockFetcher,
    link: tokio::sync::Mutex<()>,
    segment_bytes: usize,
    per_segment: Duration,
}

#[async_trait]
impl SegmentFetcher for SharedLinkFetcher {
    async fn fetch(&self, url: &Url) -> Result<Bytes, FetchError> {
        if !url.path().ends_with(".ts") {
            return self.playlists.fetch(url).await;
        }
        let _link = self.link.lock().await;
        tokio::time::sleep(self.per_segment).await;
        Ok(Bytes::from(vec![0u8; self.segment_bytes]))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Appended {
    variant: usize,
    index: usize,
    url: String,
}

/// Records appends; the position only moves when a test sets it.
#[derive(Default)]
struct RecordingSurface {
    appended: Vec<Appended>,
    position: f64,
    resets: u32,
    paused: bool,
}

impl RenderingSurface for RecordingSurface {
    fn append(&mut self, variant: usize, segment: &Segment, _data: Bytes) -> Result<(), AppError> {
        self.appended.push(Appended {
            variant,
            index: segment.index,
            url: segment.url.to_string(),
        });
        Ok(())
    }

    fn position(&self) -> f64 {
        self.position
    }

    fn reset(&mut self) {
        self.appended.clear();
        self.position = 0.0;
        self.resets += 1;
    }

    fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }
}

fn config() -> PlaybackConfig {
    PlaybackConfig {
        max_buffer_secs: 30.0,
        max_buffer_bytes: 10_000_000,
        start_buffer_secs: 2.0,
        low_watermark_secs: 5.0,
        max_concurrent_fetches: 1,
        abr_safety_ratio: 0.85,
        initial_estimate_bps: None,
        segment_retry_base_delay: Duration::from_millis(20),
        segment_retry_max_delay: Duration::from_millis(50),
        segment_timeout: Duration::from_secs(5),
        tick_interval: Duration::from_millis(5),
    }
}

fn master_playlist(ladder: &[(u64, &str)]) -> String {
    let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    for (bandwidth, name) in ladder {
        out.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={}\n{}/index.m3u8\n",
            bandwidth, name
        ));
    }
    out
}

fn media_playlist(segments: usize, secs: f64) -> String {
    let mut out = String::from(
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n#EXT-X-PLAYLIST-TYPE:VOD\n",
    );
    for i in 0..segments {
        out.push_str(&format!("#EXTINF:{:.3},\nseg{}.ts\n", secs, i));
    }
    out.push_str("#EXT-X-ENDLIST\n");
    out
}

fn segment_url(variant: &str, index: usize) -> String {
    format!("http://cdn.test/v/{}/seg{}.ts", variant, index)
}

/// Serve a master playlist at `MASTER` with `segments` segments of `secs` per variant.
fn publish(fetcher: &MockFetcher, ladder: &[(u64, &str)], segments: usize, secs: f64) {
    fetcher.serve(MASTER, master_playlist(ladder));
    for (_, name) in ladder {
        fetcher.serve(
            &format!("http://cdn.test/v/{}/index.m3u8", name),
            media_playlist(segments, secs),
        );
    }
}

const LADDER: [(u64, &str); 3] = [(500_000, "360p"), (2_000_000, "720p"), (5_000_000, "1080p")];

fn master_url() -> Url {
    Url::parse(MASTER).unwrap()
}

fn drain(rx: &mut mpsc::UnboundedReceiver<PlaybackEvent>) -> Vec<PlaybackEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn engine_with(
    fetcher: &Arc<MockFetcher>,
    config: PlaybackConfig,
    estimate: Option<u64>,
) -> PlaybackEngine<RecordingSurface, FixedEstimate> {
    PlaybackEngine::with_estimator(
        config,
        fetcher.clone(),
        RecordingSurface::default(),
        FixedEstimate(estimate),
    )
}

async fn tick_until<S, E>(
    engine: &mut PlaybackEngine<S, E>,
    max_ticks: usize,
    done: impl Fn(&PlaybackEngine<S, E>) -> bool,
) -> bool
where
    S: RenderingSurface,
    E: vidra_playback::Estimator,
{
    for _ in 0..max_ticks {
        if done(engine) {
            return true;
        }
        engine.tick().await;
    }
    done(engine)
}

#[tokio::test]
async fn test_initial_variant_follows_estimate() {
    let fetcher = Arc::new(MockFetcher::default());
    publish(&fetcher, &LADDER, 4, 4.0);
    let mut engine = engine_with(&fetcher, config(), Some(2_500_000));
    let mut events = engine.subscribe();

    engine.load(master_url()).await.unwrap();
    engine.tick().await;

    assert_eq!(engine.current_variant(), 1);
    assert_eq!(fetcher.segment_requests()[0], segment_url("720p", 0));
    assert!(drain(&mut events).contains(&PlaybackEvent::VariantSwitched {
        from: 0,
        to: 1,
        reason: SwitchReason::Initial,
    }));
}

#[tokio::test]
async fn test_no_estimate_starts_lowest() {
    let fetcher = Arc::new(MockFetcher::default());
    publish(&fetcher, &LADDER, 4, 4.0);
    let mut engine = engine_with(&fetcher, config(), None);

    engine.load(master_url()).await.unwrap();
    assert!(tick_until(&mut engine, 50, |e| e.surface().appended.len() >= 2).await);

    assert!(engine.surface().appended.iter().all(|a| a.variant == 0));
    assert_eq!(engine.current_variant(), 0);
}

#[tokio::test]
async fn test_low_watermark_forces_downgrade() {
    let fetcher = Arc::new(MockFetcher::default());
    publish(&fetcher, &LADDER, 6, 4.0);
    let mut engine = engine_with(&fetcher, config(), Some(6_000_000));
    let mut events = engine.subscribe();

    engine.load(master_url()).await.unwrap();
    engine.tick().await;
    assert_eq!(engine.current_variant(), 2);
    assert_eq!(engine.state(), PlaybackState::Playing);

    // 4s buffered is below the 5s watermark; throughput alone would stay on top
    engine.tick().await;
    assert_eq!(engine.current_variant(), 1);
    assert!(drain(&mut events).contains(&PlaybackEvent::VariantSwitched {
        from: 2,
        to: 1,
        reason: SwitchReason::LowWatermark,
    }));
    assert_eq!(fetcher.segment_requests()[1], segment_url("720p", 1));
}

#[tokio::test]
async fn test_repeated_segment_failure_downgrades_before_third_attempt() {
    let fetcher = Arc::new(MockFetcher::default());
    publish(&fetcher, &LADDER, 4, 4.0);
    let unavailable = || {
        Reply::Fail(FetchError::HttpStatus {
            status: 503,
            url: segment_url("1080p", 0),
        })
    };
    fetcher.script(&segment_url("1080p", 0), unavailable());
    fetcher.script(&segment_url("1080p", 0), unavailable());
    let mut engine = engine_with(&fetcher, config(), Some(6_000_000));
    let mut events = engine.subscribe();

    engine.load(master_url()).await.unwrap();
    assert!(tick_until(&mut engine, 50, |e| !e.surface().appended.is_empty()).await);

    assert_eq!(
        fetcher.segment_requests()[..3],
        [
            segment_url("1080p", 0),
            segment_url("1080p", 0),
            segment_url("720p", 0)
        ]
    );
    assert_eq!(engine.surface().appended[0].variant, 1);

    let events = drain(&mut events);
    let failures: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            PlaybackEvent::SegmentFailed { consecutive, .. } => Some(*consecutive),
            _ => None,
        })
        .collect();
    assert_eq!(failures, vec![1, 2]);
    assert!(events.contains(&PlaybackEvent::VariantSwitched {
        from: 2,
        to: 1,
        reason: SwitchReason::SegmentFailure,
    }));
    // no bounce back up while recovering from the failure
    assert_eq!(engine.current_variant(), 1);
}

#[tokio::test]
async fn test_lowest_variant_failure_stalls_then_retries() {
    let fetcher = Arc::new(MockFetcher::default());
    publish(&fetcher, &[(500_000, "360p")], 3, 2.0);
    for _ in 0..2 {
        fetcher.script(
            &segment_url("360p", 0),
            Reply::Fail(FetchError::Network("connection reset".into())),
        );
    }
    let mut engine = engine_with(&fetcher, config(), None);

    engine.load(master_url()).await.unwrap();
    assert!(tick_until(&mut engine, 20, |e| e.state() == PlaybackState::Stalled).await);
    assert!(engine.surface().appended.is_empty());
    assert_eq!(engine.session().consecutive_stalls, 1);

    assert!(tick_until(&mut engine, 200, |e| e.state() == PlaybackState::Playing).await);
    let attempts = fetcher
        .segment_requests()
        .iter()
        .filter(|u| **u == segment_url("360p", 0))
        .count();
    assert_eq!(attempts, 3);
    assert_eq!(engine.surface().appended[0].index, 0);
}

#[tokio::test]
async fn test_zero_variants_is_fatal() {
    let fetcher = Arc::new(MockFetcher::default());
    fetcher.serve(MASTER, "#EXTM3U\n#EXT-X-VERSION:3\n".to_string());
    let mut engine = engine_with(&fetcher, config(), None);
    let mut events = engine.subscribe();

    let err = engine.load(master_url()).await.unwrap_err();

    assert_eq!(err, AppError::NoVariants);
    assert_eq!(engine.state(), PlaybackState::Fatal);
    assert!(engine.asset().is_none());
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        PlaybackEvent::Error { code, .. } if code == "NO_VARIANTS"
    )));
    // a fatal engine does nothing further
    assert_eq!(engine.tick().await, PlaybackState::Fatal);
    assert!(fetcher.segment_requests().is_empty());
}

#[tokio::test]
async fn test_manifest_fetch_failure_is_fatal() {
    let fetcher = Arc::new(MockFetcher::default());
    let mut engine = engine_with(&fetcher, config(), None);

    let err = engine.load(master_url()).await.unwrap_err();

    assert!(matches!(err, AppError::ManifestFetch(_)));
    assert_eq!(engine.state(), PlaybackState::Fatal);
}

#[tokio::test]
async fn test_ladder_is_sorted_by_bitrate() {
    let fetcher = Arc::new(MockFetcher::default());
    publish(
        &fetcher,
        &[(5_000_000, "1080p"), (500_000, "360p"), (2_000_000, "720p")],
        2,
        4.0,
    );
    let mut engine = engine_with(&fetcher, config(), None);

    assert_ok!(engine.load(master_url()).await);

    let asset = engine.asset().unwrap();
    let bitrates: Vec<u64> = asset.variants().iter().map(|v| v.bitrate_bps).collect();
    assert_eq!(bitrates, vec![500_000, 2_000_000, 5_000_000]);
    assert!(asset.variants()[0]
        .playlist_url
        .as_str()
        .ends_with("360p/index.m3u8"));
    assert_eq!(engine.state(), PlaybackState::Buffering);
}

#[tokio::test]
async fn test_appends_stay_in_order_when_fetches_complete_out_of_order() {
    let fetcher = Arc::new(MockFetcher::default());
    publish(&fetcher, &LADDER, 6, 4.0);
    fetcher.script(&segment_url("360p", 0), Reply::Delayed(Duration::from_millis(60)));
    let mut cfg = config();
    cfg.max_concurrent_fetches = 3;
    let mut engine = engine_with(&fetcher, cfg, None);

    engine.load(master_url()).await.unwrap();
    assert!(tick_until(&mut engine, 200, |e| e.surface().appended.len() >= 3).await);

    let order: Vec<usize> = engine.surface().appended.iter().map(|a| a.index).collect();
    assert_eq!(order[..3], [0, 1, 2]);
    // later segments were requested while the first was still pending
    let mut first_batch = fetcher.segment_requests()[..3].to_vec();
    first_batch.sort();
    assert_eq!(
        first_batch,
        vec![segment_url("360p", 0), segment_url("360p", 1), segment_url("360p", 2)]
    );
}

#[tokio::test]
async fn test_loading_new_asset_discards_pending_fetches() {
    let fetcher = Arc::new(MockFetcher::default());
    publish(&fetcher, &[(500_000, "360p")], 3, 2.0);
    fetcher.script(&segment_url("360p", 0), Reply::Delayed(Duration::from_millis(100)));
    let other = "http://cdn.test/w/master.m3u8";
    fetcher.serve(other, master_playlist(&[(800_000, "480p")]));
    fetcher.serve("http://cdn.test/w/480p/index.m3u8", media_playlist(3, 2.0));

    let mut engine = engine_with(&fetcher, config(), None);
    engine.load(master_url()).await.unwrap();
    engine.tick().await;
    assert!(engine.surface().appended.is_empty());

    engine.load(Url::parse(other).unwrap()).await.unwrap();
    assert_eq!(engine.surface().resets, 2);

    // run well past the first asset's pending fetch
    let deadline = tokio::time::Instant::now() + Duration::from_millis(200);
    while tokio::time::Instant::now() < deadline {
        engine.tick().await;
    }

    let appended = &engine.surface().appended;
    assert!(!appended.is_empty());
    assert!(appended.iter().all(|a| a.url.starts_with("http://cdn.test/w/")));
    assert_eq!(engine.asset().unwrap().id, other);
}

#[tokio::test]
async fn test_buffer_is_bounded_by_time_and_bytes() {
    let fetcher = Arc::new(MockFetcher::default());
    publish(&fetcher, &LADDER, 10, 2.0);

    let mut cfg = config();
    cfg.max_buffer_secs = 6.0;
    let mut engine = engine_with(&fetcher, cfg, None);
    engine.load(master_url()).await.unwrap();
    for _ in 0..30 {
        engine.tick().await;
    }
    assert_eq!(engine.surface().appended.len(), 3);

    let mut cfg = config();
    cfg.max_buffer_bytes = (SEGMENT_BYTES * 2 + 1) as u64;
    let mut engine = engine_with(&fetcher, cfg, None);
    engine.load(master_url()).await.unwrap();
    for _ in 0..30 {
        engine.tick().await;
    }
    assert_eq!(engine.surface().appended.len(), 3);
    assert_eq!(engine.session().buffered_bytes, (SEGMENT_BYTES * 3) as u64);

    // playing past a segment frees room for the next one
    engine.surface_mut().position = 2.5;
    for _ in 0..10 {
        engine.tick().await;
    }
    assert_eq!(engine.surface().appended.len(), 4);
}

#[tokio::test]
async fn test_byte_cap_does_not_block_start() {
    let fetcher = Arc::new(MockFetcher::default());
    publish(&fetcher, &[(500_000, "360p")], 10, 2.0);

    let mut cfg = config();
    cfg.start_buffer_secs = 4.0;
    // a single segment already exceeds the cap
    cfg.max_buffer_bytes = (SEGMENT_BYTES / 2) as u64;
    let mut engine = engine_with(&fetcher, cfg, None);
    engine.load(master_url()).await.unwrap();

    assert!(tick_until(&mut engine, 50, |e| e.state() == PlaybackState::Playing).await);
    for _ in 0..20 {
        engine.tick().await;
    }
    assert_eq!(engine.surface().appended.len(), 2);
    assert_eq!(engine.state(), PlaybackState::Playing);
}

#[tokio::test]
async fn test_concurrent_fetches_measure_the_whole_link() {
    // 125 KB per 100 ms is 10 Mbps, enough for the 6 Mbps rendition
    let playlists = MockFetcher::default();
    publish(&playlists, &[(500_000, "low"), (6_000_000, "high")], 20, 2.0);
    let fetcher = Arc::new(SharedLinkFetcher {
        playlists,
        link: tokio::sync::Mutex::new(()),
        segment_bytes: 125_000,
        per_segment: Duration::from_millis(100),
    });

    let mut cfg = config();
    cfg.max_concurrent_fetches = 3;
    cfg.low_watermark_secs = 0.0;
    let mut engine = PlaybackEngine::with_estimator(
        cfg,
        fetcher,
        RecordingSurface::default(),
        ThroughputEstimator::new(None),
    );
    let mut events = engine.subscribe();

    engine.load(master_url()).await.unwrap();
    assert!(
        tick_until(&mut engine, 400, |e| {
            e.surface().appended.iter().any(|a| a.variant == 1)
        })
        .await
    );

    let estimate = engine.session().estimate_bps.unwrap();
    assert!(estimate > 7_500_000, "estimate {}", estimate);
    assert_eq!(engine.current_variant(), 1);
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, PlaybackEvent::VariantSwitched { from: 0, to: 1, .. })));
}

#[tokio::test]
async fn test_stalls_when_buffer_runs_dry() {
    let fetcher = Arc::new(MockFetcher::default());
    publish(&fetcher, &[(500_000, "360p")], 3, 2.0);
    fetcher.script(&segment_url("360p", 1), Reply::Delayed(Duration::from_millis(100)));
    let mut engine = engine_with(&fetcher, config(), None);
    let mut events = engine.subscribe();

    engine.load(master_url()).await.unwrap();
    engine.tick().await;
    assert_eq!(engine.state(), PlaybackState::Playing);
    assert!(!engine.surface().paused);

    engine.surface_mut().position = 2.0;
    engine.tick().await;
    assert_eq!(engine.state(), PlaybackState::Stalled);
    assert!(engine.surface().paused);

    assert!(tick_until(&mut engine, 200, |e| e.state() == PlaybackState::Playing).await);
    let transitions: Vec<(PlaybackState, PlaybackState)> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            PlaybackEvent::StateChanged { from, to } => Some((from, to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (PlaybackState::Uninitialized, PlaybackState::Buffering),
            (PlaybackState::Buffering, PlaybackState::Playing),
            (PlaybackState::Playing, PlaybackState::Stalled),
            (PlaybackState::Stalled, PlaybackState::Playing),
        ]
    );
}

#[tokio::test]
async fn test_plays_through_to_end() {
    let fetcher = Arc::new(MockFetcher::default());
    publish(&fetcher, &[(500_000, "360p")], 3, 2.0);
    let mut engine = PlaybackEngine::with_estimator(
        config(),
        fetcher.clone(),
        ClockSurface::new().with_speed(1000.0),
        FixedEstimate(None),
    );

    engine.load(master_url()).await.unwrap();
    assert!(tick_until(&mut engine, 500, |e| e.state() == PlaybackState::Ended).await);

    assert_eq!(engine.surface().appended_bytes(), (SEGMENT_BYTES * 3) as u64);
    assert!((engine.surface().position() - 6.0).abs() < 1e-6);
    assert_eq!(engine.tick().await, PlaybackState::Ended);
}

#[tokio::test]
async fn test_run_loads_and_stops_on_command() {
    let fetcher = Arc::new(MockFetcher::default());
    publish(&fetcher, &[(500_000, "360p")], 3, 2.0);
    let mut engine = engine_with(&fetcher, config(), None);
    let (tx, rx) = mpsc::channel(4);

    let driver = async move {
        tx.send(PlaybackCommand::Load(master_url())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(PlaybackCommand::Stop).await.unwrap();
    };
    let (state, _) = tokio::join!(engine.run(rx), driver);

    assert_eq!(state, PlaybackState::Playing);
    assert!(engine.asset().is_none());
    assert!(engine.surface().appended.is_empty());
    assert_eq!(engine.state(), PlaybackState::Uninitialized);
}
