use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    compose::{FrameComposer, TextLayoutEngine, load_font_bytes},
    config::StreamConfig,
    driver::{DeliveryDriver, DriverReport, DriverState},
    encode::{EncoderLauncher, FfmpegLauncher, ffmpeg::is_ffmpeg_available},
    foundation::{
        core::FrameRGBA,
        error::{StatcastError, StatcastResult},
    },
    metrics::{HttpMetricsSource, MetricsFetcher, MetricsSource},
    overlay::OverlayState,
};

/// Clonable handle that stops a running [`App`].
#[derive(Clone, Debug, Default)]
pub struct ShutdownHandle(CancellationToken);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        if !self.0.is_cancelled() {
            tracing::info!("shutdown requested");
        }
        self.0.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.0.is_cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.0.clone()
    }
}

/// Explicit application context: the validated configuration and the shutdown handle.
pub struct App {
    config: StreamConfig,
    shutdown: ShutdownHandle,
}

impl App {
    pub fn new(config: StreamConfig) -> StatcastResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            shutdown: ShutdownHandle::default(),
        })
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Stop all periodic work and the encoder.
    pub fn shutdown(&self) {
        self.shutdown.shutdown();
    }

    /// Broadcast with the HTTP counter API and the system `ffmpeg`.
    pub async fn run(&self) -> StatcastResult<DriverReport> {
        self.config.check_audio()?;
        if !is_ffmpeg_available(&self.config.ffmpeg_bin).await {
            return Err(StatcastError::startup(format!(
                "'{}' is required for streaming, but could not be run",
                self.config.ffmpeg_bin.display()
            )));
        }
        let source = HttpMetricsSource::new(self.config.endpoints(), self.config.fetch_timeout())?;
        let launcher = FfmpegLauncher::new(&self.config.ffmpeg_bin);
        self.run_with(Arc::new(source), Box::new(launcher)).await
    }

    /// Broadcast with the given collaborators until shutdown.
    ///
    /// Returns an error for fatal startup problems and when the encoder fails under the
    /// fail-fast policy.
    pub async fn run_with(
        &self,
        source: Arc<dyn MetricsSource>,
        launcher: Box<dyn EncoderLauncher>,
    ) -> StatcastResult<DriverReport> {
        self.config.check_audio()?;

        let composer = self.composer()?;
        let fetcher = MetricsFetcher::new(
            source,
            self.config.fetch_timeout(),
            composer.layout().avatar_diameter(),
        );
        let overlay = prime_overlay(&fetcher).await;
        if self.shutdown.is_shutdown() {
            tracing::info!("shutdown requested before streaming started");
            return Ok(DriverReport {
                final_state: DriverState::Stopped,
                ..DriverReport::default()
            });
        }

        let driver = DeliveryDriver::new(
            self.config.driver_opts(),
            composer,
            fetcher,
            launcher,
            self.shutdown.token(),
        );
        let report = driver.run(overlay).await?;
        match &report.encoder_failure {
            Some(exit) => Err(StatcastError::encoder(format!("encoder {exit}"))),
            None => Ok(report),
        }
    }

    /// Render one settled overlay frame, refreshing both sources first when `source` is set.
    pub async fn preview(&self, source: Option<Arc<dyn MetricsSource>>) -> StatcastResult<FrameRGBA> {
        let mut composer = self.composer()?;
        let mut overlay = match source {
            Some(source) => {
                let fetcher = MetricsFetcher::new(
                    source,
                    self.config.fetch_timeout(),
                    composer.layout().avatar_diameter(),
                );
                prime_overlay(&fetcher).await
            }
            None => OverlayState::new(),
        };
        overlay.settle();
        Ok(composer.compose(&overlay))
    }

    fn composer(&self) -> StatcastResult<FrameComposer> {
        let canvas = self.config.canvas()?;
        let text = match load_font_bytes(self.config.font_path.as_deref())
            .and_then(TextLayoutEngine::new)
        {
            Ok(engine) => {
                tracing::info!(family = engine.family_name(), "font loaded");
                Some(engine)
            }
            Err(e) => {
                tracing::warn!(error = %e, "text disabled; rendering without labels");
                None
            }
        };
        Ok(FrameComposer::new(canvas, text))
    }
}

/// First refresh of both sources, run concurrently; failures follow the refresh policy.
pub async fn prime_overlay(fetcher: &MetricsFetcher) -> OverlayState {
    let mut overlay = OverlayState::new();
    let (channel, stream) = tokio::join!(fetcher.fetch_channel(true), fetcher.fetch_stream());
    channel.apply(&mut overlay);
    stream.apply(&mut overlay);
    overlay
}
