//! statcast renders a live channel statistics overlay and publishes it to an RTMP ingest
//! endpoint through `ffmpeg`.
//!
//! - [`metrics`] fetches channel and live-stream counters with timeouts and a fixed failure
//!   policy
//! - [`animator`] smooths fetched counters into continuous animation
//! - [`compose`] renders overlay frames on the CPU
//! - [`driver`] runs the render cadence, the refresh timers and the encoder lifecycle
//! - [`App`] ties them together behind an explicit shutdown handle
#![forbid(unsafe_code)]

mod assets;
mod foundation;

pub mod animator;
pub mod app;
pub mod compose;
pub mod config;
pub mod driver;
pub mod encode;
pub mod metrics;
pub mod overlay;

pub use crate::assets::{PreparedImage, decode_avatar};
pub use crate::foundation::core::{Canvas, FrameRGBA, Rgba8};
pub use crate::foundation::error::{StatcastError, StatcastResult};

pub use crate::animator::{CounterKey, ValueAnimator};
pub use crate::app::{App, ShutdownHandle, prime_overlay};
pub use crate::compose::{FrameComposer, format_count};
pub use crate::config::StreamConfig;
pub use crate::driver::{Cadence, DeliveryDriver, DriverOpts, DriverReport, DriverState, RestartPolicy};
pub use crate::encode::{
    Delivery, EncoderExit, EncoderInput, EncoderLauncher, EncoderSession, FfmpegLauncher,
    SinkConfig,
};
pub use crate::metrics::{ChannelStats, MetricsFetcher, MetricsSource, StreamStats};
pub use crate::overlay::{ChannelProfile, OverlayState};
