//! Adaptive playback engine.
//!
//! Schedules segment fetches for the loaded asset, hands results to the
//! [`RenderingSurface`] in strict media-time order and drives the playback state
//! machine (`Buffering`, `Playing`, `Stalled`, `Ended`, `Fatal`).

use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::FuturesOrdered;
use futures::{FutureExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;
use vidra_core::models::{
    MediaAsset, PlaybackEvent, PlaybackSession, PlaybackState, Segment, SwitchReason,
};
use vidra_core::{AppError, ErrorMetadata, PlaybackConfig, ProgressReporter};

use crate::abr::{AbrController, Estimator, LinkMeter, ThroughputEstimator};
use crate::fetch::{FetchError, SegmentFetcher};
use crate::manifest::ManifestResolver;
use crate::surface::RenderingSurface;

const TIME_EPSILON: f64 = 1e-3;

/// Commands accepted by [`PlaybackEngine::run`].
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackCommand {
    Load(Url),
    Stop,
}

struct FetchOutcome {
    generation: u64,
    variant: usize,
    segment: Segment,
    started: Instant,
    finished: Instant,
    result: Result<Bytes, FetchError>,
}

enum Step {
    Fetched(FetchOutcome),
    Tick,
}

enum Wake {
    Command(Option<PlaybackCommand>),
    Step(Step),
}

pub struct PlaybackEngine<S: RenderingSurface, E: Estimator = ThroughputEstimator> {
    config: PlaybackConfig,
    fetcher: Arc<dyn SegmentFetcher>,
    resolver: ManifestResolver,
    surface: S,
    abr: AbrController<E>,
    meter: LinkMeter,
    reporter: ProgressReporter<PlaybackEvent>,
    asset: Option<Arc<MediaAsset>>,
    session: PlaybackSession,
    /// Cancels every fetch belonging to the loaded asset
    cancel: CancellationToken,
    in_flight: FuturesOrdered<BoxFuture<'static, FetchOutcome>>,
    /// End of the last scheduled segment (media time)
    scheduled_end: f64,
    /// Set after each fetch result; the ABR controller runs once per fetch
    abr_pending: bool,
    /// Earliest time the next fetch may start while backing off
    retry_at: Option<Instant>,
}

impl<S: RenderingSurface> PlaybackEngine<S, ThroughputEstimator> {
    pub fn new(config: PlaybackConfig, fetcher: Arc<dyn SegmentFetcher>, surface: S) -> Self {
        let estimator = ThroughputEstimator::new(config.initial_estimate_bps);
        Self::with_estimator(config, fetcher, surface, estimator)
    }
}

impl<S: RenderingSurface, E: Estimator> PlaybackEngine<S, E> {
    pub fn with_estimator(
        config: PlaybackConfig,
        fetcher: Arc<dyn SegmentFetcher>,
        surface: S,
        estimator: E,
    ) -> Self {
        let abr = AbrController::new(&config, estimator);
        Self {
            resolver: ManifestResolver::new(fetcher.clone()),
            fetcher,
            surface,
            abr,
            meter: LinkMeter::new(),
            reporter: ProgressReporter::new(),
            asset: None,
            session: PlaybackSession::new(0),
            cancel: CancellationToken::new(),
            in_flight: FuturesOrdered::new(),
            scheduled_end: 0.0,
            abr_pending: false,
            retry_at: None,
            config,
        }
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<PlaybackEvent> {
        self.reporter.subscribe()
    }

    pub fn state(&self) -> PlaybackState {
        self.session.state
    }

    pub fn session(&self) -> &PlaybackSession {
        &self.session
    }

    pub fn asset(&self) -> Option<&MediaAsset> {
        self.asset.as_deref()
    }

    pub fn current_variant(&self) -> usize {
        self.session.variant
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    fn is_active(&self) -> bool {
        self.asset.is_some() && !self.session.state.is_terminal()
    }

    /// Tear down the current asset: cancel its fetches, clear the surface and
    /// start a fresh session.
    fn teardown(&mut self) {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.in_flight = FuturesOrdered::new();
        self.surface.reset();
        self.asset = None;
        self.session = PlaybackSession::new(self.session.generation + 1);
        self.scheduled_end = 0.0;
        self.abr_pending = false;
        self.retry_at = None;
        self.meter.reset();
    }

    fn set_state(&mut self, next: PlaybackState) {
        let from = self.session.state;
        if !from.can_transition_to(next) {
            return;
        }
        self.session.state = next;
        if next == PlaybackState::Stalled {
            self.session.consecutive_stalls += 1;
        }
        self.surface.set_paused(next != PlaybackState::Playing);
        tracing::info!(
            generation = self.session.generation,
            from = %from,
            to = %next,
            position = self.surface.position(),
            "Playback state changed"
        );
        self.reporter
            .emit(PlaybackEvent::StateChanged { from, to: next });
    }

    fn switch_variant(&mut self, to: usize, reason: SwitchReason) {
        let from = self.session.variant;
        if from == to {
            return;
        }
        self.session.variant = to;
        self.abr.switch_to(to);
        tracing::info!(from, to, reason = ?reason, "Variant switched");
        self.reporter
            .emit(PlaybackEvent::VariantSwitched { from, to, reason });
    }

    fn fail(&mut self, err: AppError) -> AppError {
        tracing::error!(error = %err, code = err.error_code(), "Playback failed");
        self.reporter.emit(PlaybackEvent::Error {
            code: err.error_code().to_string(),
            message: err.to_string(),
        });
        self.cancel.cancel();
        self.in_flight = FuturesOrdered::new();
        self.set_state(PlaybackState::Fatal);
        err
    }

    /// Switch to a new asset. Pending fetches of the previous asset are cancelled and
    /// their results are never appended.
    #[tracing::instrument(skip(self), fields(manifest_url = %manifest_url))]
    pub async fn load(&mut self, manifest_url: Url) -> Result<(), AppError> {
        self.teardown();
        self.abr.reset_estimator();
        self.set_state(PlaybackState::Buffering);

        let asset = match self.resolver.resolve(&manifest_url).await {
            Ok(asset) => asset,
            Err(e) => return Err(self.fail(e)),
        };

        self.abr
            .set_ladder(asset.variants().iter().map(|v| v.bitrate_bps).collect());
        self.session.variant = asset.lowest();
        self.session.estimate_bps = self.abr.estimate_bps();
        self.asset = Some(Arc::new(asset));
        self.abr_pending = true;
        Ok(())
    }

    /// Stop playback and release everything held for the current asset.
    pub fn stop(&mut self) {
        self.teardown();
    }

    /// Advance playback by one step: schedule fetches, then wait for the next fetch
    /// result or the tick interval, whichever comes first.
    pub async fn tick(&mut self) -> PlaybackState {
        if self.is_active() {
            let step = self.advance().await;
            self.apply(step);
        }
        self.session.state
    }

    /// Drive playback until `Stop` arrives or the command channel closes. A command
    /// arriving mid-step drops that step before the command is handled.
    pub async fn run(&mut self, mut commands: mpsc::Receiver<PlaybackCommand>) -> PlaybackState {
        loop {
            let active = self.is_active();
            let wake = tokio::select! {
                command = commands.recv() => Wake::Command(command),
                step = self.advance(), if active => Wake::Step(step),
            };

            match wake {
                Wake::Step(step) => self.apply(step),
                Wake::Command(Some(PlaybackCommand::Load(url))) => {
                    if let Err(e) = self.load(url).await {
                        tracing::warn!(error = %e, "Load failed");
                    }
                }
                Wake::Command(Some(PlaybackCommand::Stop)) | Wake::Command(None) => {
                    let state = self.session.state;
                    self.stop();
                    return state;
                }
            }
        }
    }

    async fn advance(&mut self) -> Step {
        self.schedule();
        let tick = tokio::time::sleep(self.config.tick_interval);
        if self.in_flight.is_empty() {
            tick.await;
            return Step::Tick;
        }
        tokio::select! {
            Some(outcome) = self.in_flight.next() => Step::Fetched(outcome),
            _ = tick => Step::Tick,
        }
    }

    fn apply(&mut self, step: Step) {
        if let Step::Fetched(outcome) = step {
            self.handle_fetch(outcome);
        }
        self.update_state();
    }

    /// Queue fetches for the next segments while the buffer has room.
    fn schedule(&mut self) {
        let Some(asset) = self.asset.clone() else {
            return;
        };
        if self.session.state.is_terminal() {
            return;
        }
        if let Some(at) = self.retry_at {
            if Instant::now() < at {
                return;
            }
            self.retry_at = None;
        }

        let position = self.surface.position();
        if self.in_flight.is_empty() {
            self.scheduled_end = self.session.buffered_end;
        }

        if self.abr_pending {
            self.abr_pending = false;
            self.evaluate_abr(position);
        }

        while self.in_flight.len() < self.config.max_concurrent_fetches.max(1) {
            if self.scheduled_end - position >= self.config.max_buffer_secs {
                break;
            }
            // the byte cap never holds playback below the start threshold
            if self.session.buffered_bytes >= self.config.max_buffer_bytes
                && self.session.buffered_ahead(position) >= self.config.start_buffer_secs
            {
                break;
            }
            let variant_index = self.session.variant;
            let Some(variant) = asset.variant(variant_index) else {
                break;
            };
            let Some(segment_index) = variant.segment_index_at(self.scheduled_end) else {
                break;
            };
            let segment = variant.segments[segment_index].clone();
            self.scheduled_end = segment.end();
            self.enqueue(variant_index, segment);
        }
    }

    fn enqueue(&mut self, variant: usize, segment: Segment) {
        tracing::debug!(variant, segment = segment.index, start = segment.start, "Fetching segment");
        let fetcher = self.fetcher.clone();
        let cancel = self.cancel.clone();
        let generation = self.session.generation;
        let fetch = async move {
            let started = Instant::now();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(FetchError::Cancelled),
                result = fetcher.fetch(&segment.url) => result,
            };
            FetchOutcome {
                generation,
                variant,
                segment,
                started,
                finished: Instant::now(),
                result,
            }
        };
        self.in_flight.push_back(fetch.boxed());
    }

    fn evaluate_abr(&mut self, position: f64) {
        let started = matches!(
            self.session.state,
            PlaybackState::Playing | PlaybackState::Stalled
        );
        let decision = self.abr.decide(
            self.session.buffered_ahead(position),
            started,
            self.session.failing_segment.is_none(),
        );
        if !decision.changed {
            return;
        }
        let first_pick = !started
            && self.session.buffered_end <= 0.0
            && self.session.failing_segment.is_none();
        let reason = if first_pick {
            Some(SwitchReason::Initial)
        } else {
            decision.reason.switch_reason()
        };
        if let Some(reason) = reason {
            self.switch_variant(decision.target_variant_index, reason);
        }
    }

    fn handle_fetch(&mut self, outcome: FetchOutcome) {
        if outcome.generation != self.session.generation {
            return;
        }
        self.abr_pending = true;

        let FetchOutcome {
            variant,
            segment,
            started,
            finished,
            result,
            ..
        } = outcome;

        match result {
            Ok(data) => {
                let bytes = data.len() as u64;
                if let Some((sampled, busy)) = self.meter.record(bytes, started, finished) {
                    self.abr.push_sample(sampled, busy);
                }
                self.session.estimate_bps = self.abr.estimate_bps();
                if let Err(e) = self.surface.append(variant, &segment, data) {
                    self.fail(e);
                    return;
                }
                self.session.record_append(segment.end(), bytes);
                if self.session.state == PlaybackState::Playing {
                    self.session.consecutive_stalls = 0;
                }
                self.reporter.emit(PlaybackEvent::SegmentAppended {
                    variant,
                    index: segment.index,
                    bytes,
                });
            }
            Err(FetchError::Cancelled) => {}
            Err(e) => self.handle_segment_failure(variant, &segment, e),
        }
    }

    fn handle_segment_failure(&mut self, variant: usize, segment: &Segment, err: FetchError) {
        // later segments cannot be appended before this one
        self.in_flight = FuturesOrdered::new();
        self.scheduled_end = self.session.buffered_end;

        let consecutive = self.session.record_failure(segment.index);
        tracing::warn!(
            variant,
            segment = segment.index,
            consecutive,
            transient = err.is_transient(),
            error = %err,
            "Segment fetch failed"
        );
        self.reporter.emit(PlaybackEvent::SegmentFailed {
            variant,
            index: segment.index,
            consecutive,
            message: err.into_segment_error(segment.index).to_string(),
        });

        if consecutive < 2 {
            return;
        }
        if self.session.variant > 0 {
            let lower = self.session.variant - 1;
            self.switch_variant(lower, SwitchReason::SegmentFailure);
            return;
        }

        let delay = self.config.segment_retry_delay(consecutive - 1);
        tracing::warn!(
            segment = segment.index,
            delay_ms = delay.as_millis() as u64,
            "Lowest variant failing, backing off"
        );
        self.retry_at = Some(Instant::now() + delay);
        self.set_state(PlaybackState::Stalled);
    }

    fn update_state(&mut self) {
        let Some(asset) = self.asset.clone() else {
            return;
        };
        let position = self.surface.position();
        self.session.evict_played(position);

        let content_end = asset
            .variant(self.session.variant)
            .map(|v| v.duration())
            .unwrap_or(asset.duration);
        let all_buffered = self.session.buffered_end >= content_end - TIME_EPSILON;
        let at_end = all_buffered && position >= self.session.buffered_end - TIME_EPSILON;
        let ahead = self.session.buffered_ahead(position);

        match self.session.state {
            PlaybackState::Buffering | PlaybackState::Stalled => {
                if at_end && self.session.buffered_end > 0.0 {
                    self.set_state(PlaybackState::Ended);
                } else if self.retry_at.is_none()
                    && (ahead >= self.config.start_buffer_secs
                        || (all_buffered && ahead > TIME_EPSILON))
                {
                    self.set_state(PlaybackState::Playing);
                }
            }
            PlaybackState::Playing => {
                if at_end {
                    self.set_state(PlaybackState::Ended);
                } else if ahead <= TIME_EPSILON {
                    self.set_state(PlaybackState::Stalled);
                }
            }
            _ => {}
        }
    }
}
