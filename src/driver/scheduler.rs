use std::{path::PathBuf, time::Duration};

use tokio::{
    task::JoinSet,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    animator::CounterKey,
    compose::FrameComposer,
    driver::{
        cadence::{Cadence, FrameThrottle},
        state::{DriverReport, DriverState, RestartPolicy},
    },
    encode::{Delivery, EncoderExit, EncoderLauncher, EncoderSession, SinkConfig, write_png_atomic},
    foundation::error::{StatcastError, StatcastResult},
    metrics::{FetchKind, FetchOutcome, MetricsFetcher},
    overlay::OverlayState,
};

/// Timing and lifecycle settings of a [`DeliveryDriver`].
#[derive(Clone, Debug)]
pub struct DriverOpts {
    pub cadence: Cadence,
    pub fps: u32,
    pub frame_tolerance: Duration,
    /// Push scheduling granularity.
    pub tick: Duration,
    pub poll_period: Duration,
    pub poll_frame_path: PathBuf,
    pub channel_refresh: Duration,
    pub stream_refresh: Duration,
    pub restart: RestartPolicy,
    pub restart_delay: Duration,
    pub shutdown_grace: Duration,
    pub sink: SinkConfig,
}

/// Owns the overlay state and runs rendering, fetching and the encoder lifecycle in one loop.
pub struct DeliveryDriver {
    opts: DriverOpts,
    composer: FrameComposer,
    fetcher: MetricsFetcher,
    launcher: Box<dyn EncoderLauncher>,
    shutdown: CancellationToken,
    state: DriverState,
    report: DriverReport,
    in_flight: [bool; 2],
}

impl DeliveryDriver {
    pub fn new(
        opts: DriverOpts,
        composer: FrameComposer,
        fetcher: MetricsFetcher,
        launcher: Box<dyn EncoderLauncher>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            opts,
            composer,
            fetcher,
            launcher,
            shutdown,
            state: DriverState::Idle,
            report: DriverReport::default(),
            in_flight: [false; 2],
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    fn transition(&mut self, next: DriverState) {
        if self.state == next {
            return;
        }
        debug_assert!(
            self.state.can_become(next),
            "illegal driver transition {:?} -> {next:?}",
            self.state
        );
        tracing::debug!(from = ?self.state, to = ?next, "driver state");
        self.state = next;
    }

    /// Run until the shutdown token is cancelled or the encoder fails under
    /// [`RestartPolicy::FailFast`].
    ///
    /// `overlay` should already hold the result of the first refresh of both sources. Failing
    /// to launch the encoder the first time is an error; later launch failures are retried.
    pub async fn run(mut self, mut overlay: OverlayState) -> StatcastResult<DriverReport> {
        self.transition(DriverState::Starting);
        if self.opts.cadence == Cadence::Poll {
            // The still-image input must exist before the encoder opens it.
            overlay.counters.tick();
            self.write_poll_frame(&overlay).await;
        }
        let mut session = match self.launcher.launch(&self.opts.sink).await {
            Ok(s) => Some(s),
            Err(e) => {
                self.transition(DriverState::Stopping);
                self.transition(DriverState::Stopped);
                return Err(StatcastError::startup(format!("encoder launch failed: {e}")));
            }
        };
        self.transition(DriverState::Streaming);
        tracing::info!(
            cadence = ?self.opts.cadence,
            fps = self.opts.fps,
            "streaming"
        );

        let render_every = match self.opts.cadence {
            Cadence::Push => self.opts.tick,
            Cadence::Poll => self.opts.poll_period,
        };
        let mut render = tokio::time::interval(render_every);
        render.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut throttle = FrameThrottle::new(self.opts.fps, self.opts.frame_tolerance);

        let now = Instant::now();
        let mut channel_timer =
            tokio::time::interval_at(now + self.opts.channel_refresh, self.opts.channel_refresh);
        channel_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stream_timer =
            tokio::time::interval_at(now + self.opts.stream_refresh, self.opts.stream_refresh);
        stream_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut fetches: JoinSet<FetchOutcome> = JoinSet::new();
        let mut restart_at: Option<Instant> = None;
        let shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                exit = wait_exit(&mut session) => {
                    session = None;
                    if shutdown.is_cancelled() {
                        break;
                    }
                    match self.opts.restart {
                        RestartPolicy::FailFast => {
                            tracing::error!(%exit, "encoder exited; stopping");
                            self.report.encoder_failure = Some(exit);
                            break;
                        }
                        RestartPolicy::Restart => {
                            tracing::warn!(
                                %exit,
                                delay_ms = self.opts.restart_delay.as_millis() as u64,
                                "encoder exited; restarting"
                            );
                            self.transition(DriverState::Starting);
                            restart_at = Some(Instant::now() + self.opts.restart_delay);
                        }
                    }
                }

                _ = sleep_until_opt(restart_at) => {
                    restart_at = None;
                    if shutdown.is_cancelled() {
                        break;
                    }
                    match self.launcher.launch(&self.opts.sink).await {
                        Ok(s) => {
                            session = Some(s);
                            self.report.restarts += 1;
                            self.transition(DriverState::Streaming);
                            tracing::info!(restarts = self.report.restarts, "encoder restarted");
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "encoder relaunch failed; retrying");
                            restart_at = Some(Instant::now() + self.opts.restart_delay);
                        }
                    }
                }

                Some(joined) = fetches.join_next() => match joined {
                    Ok(outcome) => {
                        self.in_flight[slot(outcome.kind())] = false;
                        outcome.apply(&mut overlay);
                    }
                    Err(e) if e.is_panic() => {
                        tracing::error!(error = %e, "fetch task panicked; shutting down");
                        shutdown.cancel();
                    }
                    Err(e) => tracing::debug!(error = %e, "fetch task cancelled"),
                },

                _ = channel_timer.tick() => {
                    let want_avatar = !overlay.profile.has_avatar();
                    self.spawn_fetch(&mut fetches, FetchKind::Channel, move |f| async move {
                        f.fetch_channel(want_avatar).await
                    });
                }

                _ = stream_timer.tick() => {
                    self.spawn_fetch(&mut fetches, FetchKind::Stream, |f| async move {
                        f.fetch_stream().await
                    });
                }

                _ = render.tick() => match self.opts.cadence {
                    Cadence::Push => {
                        let Some(active) = session.as_ref() else {
                            continue;
                        };
                        if !throttle.ready(Instant::now()) {
                            continue;
                        }
                        overlay.counters.tick();
                        let frame = self.composer.compose(&overlay);
                        self.record(active.deliver(frame));
                    }
                    Cadence::Poll => {
                        overlay.counters.tick();
                        self.write_poll_frame(&overlay).await;
                    }
                },
            }
        }

        self.transition(DriverState::Stopping);
        // In-flight fetches finish or time out on their own; their results are discarded.
        fetches.detach_all();
        if let Some(s) = session.take() {
            let exit = s.shutdown(self.opts.shutdown_grace).await;
            tracing::info!(%exit, "encoder stopped");
        }
        self.transition(DriverState::Stopped);
        self.report.final_state = self.state;
        self.report.displayed = CounterKey::ALL.map(|k| overlay.counters.displayed(k));
        tracing::info!(
            delivered = self.report.frames_delivered,
            dropped = self.report.frames_dropped,
            restarts = self.report.restarts,
            "driver stopped"
        );
        Ok(self.report)
    }

    async fn write_poll_frame(&mut self, overlay: &OverlayState) {
        let frame = self.composer.compose(overlay);
        let path = self.opts.poll_frame_path.clone();
        let written = tokio::task::spawn_blocking(move || write_png_atomic(&path, &frame)).await;
        match written {
            Ok(Ok(())) => self.report.frames_delivered += 1,
            Ok(Err(e)) => tracing::warn!(error = %e, "failed to write poll frame"),
            Err(e) => tracing::warn!(error = %e, "poll frame writer failed"),
        }
    }

    fn record(&mut self, delivery: Delivery) {
        match delivery {
            Delivery::Sent => self.report.frames_delivered += 1,
            Delivery::Dropped => {
                self.report.frames_dropped += 1;
                tracing::debug!(dropped = self.report.frames_dropped, "encoder busy; frame dropped");
            }
            Delivery::Closed => tracing::debug!("encoder input closed; frame discarded"),
        }
    }

    fn spawn_fetch<F, Fut>(&mut self, fetches: &mut JoinSet<FetchOutcome>, kind: FetchKind, f: F)
    where
        F: FnOnce(MetricsFetcher) -> Fut,
        Fut: Future<Output = FetchOutcome> + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            return;
        }
        let slot = slot(kind);
        if self.in_flight[slot] {
            tracing::debug!(?kind, "previous refresh still in flight; skipping");
            return;
        }
        self.in_flight[slot] = true;
        fetches.spawn(f(self.fetcher.clone()));
    }
}

fn slot(kind: FetchKind) -> usize {
    match kind {
        FetchKind::Channel => 0,
        FetchKind::Stream => 1,
    }
}

async fn wait_exit(session: &mut Option<EncoderSession>) -> EncoderExit {
    match session {
        Some(s) => s.wait_exit().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_kinds_have_distinct_slots() {
        assert_ne!(slot(FetchKind::Channel), slot(FetchKind::Stream));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_helpers_never_resolve() {
        let mut none: Option<EncoderSession> = None;
        let pending = tokio::time::timeout(Duration::from_secs(60), async {
            tokio::select! {
                _ = wait_exit(&mut none) => {}
                _ = sleep_until_opt(None) => {}
            }
        })
        .await;
        assert!(pending.is_err());
    }
}
