//! Encoder processes and the frame hand-off to them.
//!
//! Frames are queued to a writer task that owns the encoder's stdin; a supervisor task owns the
//! process and reports how it ended.

/// `ffmpeg`-based RTMP publishing.
pub mod ffmpeg;
/// Encoder session, launcher trait and sink configuration.
pub mod sink;
/// Still-frame PNG output for poll cadence and previews.
pub mod still;

pub use ffmpeg::FfmpegLauncher;
pub use sink::{
    Delivery, EncoderExit, EncoderInput, EncoderLauncher, EncoderSession, SinkConfig, VideoLimits,
};
pub use still::{save_png, write_png_atomic};
