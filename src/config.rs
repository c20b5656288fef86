use std::{
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    driver::{Cadence, DriverOpts, RestartPolicy},
    encode::{EncoderInput, SinkConfig, VideoLimits},
    foundation::{
        core::Canvas,
        error::{StatcastError, StatcastResult},
    },
    metrics::HttpEndpoints,
};

pub const DEFAULT_CHANNEL_URL_TEMPLATE: &str =
    "https://api.livecounts.io/youtube-live-subscriber-counter/stats/{id}";
pub const DEFAULT_STREAM_URL_TEMPLATE: &str =
    "https://api.livecounts.io/youtube-live-view-counter/stats/{id}";
pub const DEFAULT_INGEST_URL: &str = "rtmp://a.rtmp.youtube.com/live2";

/// Encoder quality settings. Unset bitrates are derived from the output resolution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncoderSettings {
    pub preset: String,
    pub video_bitrate_kbps: Option<u32>,
    pub maxrate_kbps: Option<u32>,
    pub bufsize_kbps: Option<u32>,
    pub audio_bitrate_kbps: u32,
    /// Keyframe interval in seconds.
    pub gop_secs: u32,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            preset: "veryfast".to_owned(),
            video_bitrate_kbps: None,
            maxrate_kbps: None,
            bufsize_kbps: None,
            audio_bitrate_kbps: 128,
            gop_secs: 2,
        }
    }
}

/// Recommended H.264 live bitrate for a resolution and frame rate.
pub fn recommended_bitrate_kbps(height: u32, fps: u32) -> u32 {
    let high_fps = fps > 30;
    match height {
        0..=360 => 1000,
        361..=480 => 1500,
        481..=720 if high_fps => 4500,
        481..=720 => 3000,
        721..=1080 if high_fps => 6000,
        721..=1080 => 4500,
        1081..=1440 => 9000,
        _ => 13000,
    }
}

/// Complete broadcaster configuration.
///
/// Every field has a default except the channel id, stream id and stream key, which must be
/// supplied by the config file, the command line or the environment before [`validate`]
/// passes.
///
/// [`validate`]: StreamConfig::validate
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
    /// Output width in pixels; must be even.
    pub width: u32,
    /// Output height in pixels; must be even.
    pub height: u32,
    /// Encoded frame rate.
    pub fps: u32,
    /// Slack subtracted from the push frame interval.
    pub frame_tolerance_ms: u64,
    /// Push scheduler granularity.
    pub tick_ms: u64,
    pub cadence: Cadence,
    /// How often poll cadence rewrites the still frame.
    pub poll_period_ms: u64,
    /// Rate at which the encoder re-reads the still frame.
    pub poll_input_fps: u32,
    pub poll_frame_path: PathBuf,

    pub channel_id: String,
    pub stream_id: String,
    /// Channel counter endpoint; `{id}` is replaced by `channel_id`.
    pub channel_url_template: String,
    /// Live counter endpoint; `{id}` is replaced by `stream_id`.
    pub stream_url_template: String,
    /// `rtmp://` or `rtmps://` ingest base, without the key.
    pub ingest_url: String,
    /// Secret appended to `ingest_url`. Never written back out.
    #[serde(skip_serializing)]
    pub stream_key: String,
    /// Audio track looped under the video.
    pub audio_path: PathBuf,

    pub channel_refresh_secs: u64,
    pub stream_refresh_secs: u64,
    /// Per-request limit; must be shorter than both refresh intervals.
    pub fetch_timeout_ms: u64,

    /// Font for labels; system fallbacks are tried when unset.
    pub font_path: Option<PathBuf>,
    pub ffmpeg_bin: PathBuf,
    pub encoder: EncoderSettings,

    pub restart: RestartPolicy,
    pub restart_delay_ms: u64,
    /// Time the encoder gets to flush before it is killed.
    pub shutdown_grace_ms: u64,
    /// Frames the encoder queue holds before new ones are dropped.
    pub frame_queue: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
            frame_tolerance_ms: 5,
            tick_ms: 5,
            cadence: Cadence::Push,
            poll_period_ms: 200,
            poll_input_fps: 5,
            poll_frame_path: PathBuf::from("statcast-frame.png"),
            channel_id: String::new(),
            stream_id: String::new(),
            channel_url_template: DEFAULT_CHANNEL_URL_TEMPLATE.to_owned(),
            stream_url_template: DEFAULT_STREAM_URL_TEMPLATE.to_owned(),
            ingest_url: DEFAULT_INGEST_URL.to_owned(),
            stream_key: String::new(),
            audio_path: PathBuf::from("audio.mp3"),
            channel_refresh_secs: 60,
            stream_refresh_secs: 5,
            fetch_timeout_ms: 3000,
            font_path: None,
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            encoder: EncoderSettings::default(),
            restart: RestartPolicy::Restart,
            restart_delay_ms: 3000,
            shutdown_grace_ms: 5000,
            frame_queue: 2,
        }
    }
}

impl StreamConfig {
    pub fn from_path(path: impl AsRef<Path>) -> StatcastResult<Self> {
        let path = path.as_ref();
        let f = File::open(path).map_err(|e| {
            StatcastError::validation(format!("open config '{}': {e}", path.display()))
        })?;
        Self::from_reader(BufReader::new(f))
            .map_err(|e| StatcastError::validation(format!("config '{}': {e}", path.display())))
    }

    pub fn from_reader(r: impl Read) -> StatcastResult<Self> {
        serde_json::from_reader(r)
            .map_err(|e| StatcastError::validation(format!("invalid config json: {e}")))
    }

    /// Check every field, reporting the first violation.
    pub fn validate(&self) -> StatcastResult<()> {
        self.canvas()?;
        if !(1..=120).contains(&self.fps) {
            return Err(StatcastError::validation("fps must be in 1..=120"));
        }
        if self.tick_ms == 0 {
            return Err(StatcastError::validation("tick_ms must be > 0"));
        }
        if self.poll_period_ms == 0 || self.poll_input_fps == 0 {
            return Err(StatcastError::validation(
                "poll_period_ms and poll_input_fps must be > 0",
            ));
        }
        for (field, value) in [
            ("channel_id", &self.channel_id),
            ("stream_id", &self.stream_id),
            ("stream_key", &self.stream_key),
        ] {
            if value.trim().is_empty() {
                return Err(StatcastError::validation(format!("{field} is required")));
            }
        }
        for (field, value) in [
            ("channel_url_template", &self.channel_url_template),
            ("stream_url_template", &self.stream_url_template),
        ] {
            if !value.contains("{id}") {
                return Err(StatcastError::validation(format!(
                    "{field} must contain an {{id}} placeholder"
                )));
            }
        }
        if !(self.ingest_url.starts_with("rtmp://") || self.ingest_url.starts_with("rtmps://")) {
            return Err(StatcastError::validation(
                "ingest_url must be an rtmp:// or rtmps:// url",
            ));
        }
        if self.channel_refresh_secs == 0 || self.stream_refresh_secs == 0 {
            return Err(StatcastError::validation("refresh intervals must be > 0"));
        }
        let shortest_refresh = self.channel_refresh().min(self.stream_refresh());
        if self.fetch_timeout_ms == 0 || self.fetch_timeout() >= shortest_refresh {
            return Err(StatcastError::validation(format!(
                "fetch_timeout_ms must be > 0 and shorter than the shortest refresh interval ({} ms)",
                shortest_refresh.as_millis()
            )));
        }
        if self.frame_queue == 0 {
            return Err(StatcastError::validation("frame_queue must be >= 1"));
        }
        if self.shutdown_grace_ms == 0 {
            return Err(StatcastError::validation("shutdown_grace_ms must be > 0"));
        }
        if self.encoder.preset.trim().is_empty() || self.encoder.gop_secs == 0 {
            return Err(StatcastError::validation(
                "encoder preset must be set and gop_secs > 0",
            ));
        }
        Ok(())
    }

    /// Fail when the looping audio track is missing.
    pub fn check_audio(&self) -> StatcastResult<()> {
        if self.audio_path.is_file() {
            Ok(())
        } else {
            Err(StatcastError::startup(format!(
                "audio file '{}' not found",
                self.audio_path.display()
            )))
        }
    }

    pub fn canvas(&self) -> StatcastResult<Canvas> {
        Canvas::new(self.width, self.height)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn channel_refresh(&self) -> Duration {
        Duration::from_secs(self.channel_refresh_secs)
    }

    pub fn stream_refresh(&self) -> Duration {
        Duration::from_secs(self.stream_refresh_secs)
    }

    pub fn endpoints(&self) -> HttpEndpoints {
        HttpEndpoints::from_templates(
            &self.channel_url_template,
            &self.channel_id,
            &self.stream_url_template,
            &self.stream_id,
        )
    }

    /// `ingest_url/stream_key`.
    pub fn output_url(&self) -> String {
        format!(
            "{}/{}",
            self.ingest_url.trim_end_matches('/'),
            self.stream_key.trim()
        )
    }

    pub fn video_limits(&self) -> VideoLimits {
        let e = &self.encoder;
        let bitrate = e
            .video_bitrate_kbps
            .unwrap_or_else(|| recommended_bitrate_kbps(self.height, self.fps));
        let maxrate = e.maxrate_kbps.unwrap_or(bitrate);
        VideoLimits {
            preset: e.preset.clone(),
            bitrate_kbps: bitrate,
            maxrate_kbps: maxrate,
            bufsize_kbps: e.bufsize_kbps.unwrap_or(maxrate.saturating_mul(2)),
            audio_bitrate_kbps: e.audio_bitrate_kbps,
            gop_frames: e.gop_secs.saturating_mul(self.fps),
        }
    }

    pub fn sink_config(&self) -> SinkConfig {
        let input = match self.cadence {
            Cadence::Push => EncoderInput::RawPipe,
            Cadence::Poll => EncoderInput::StillImage {
                path: self.poll_frame_path.clone(),
                input_fps: self.poll_input_fps,
            },
        };
        SinkConfig {
            width: self.width,
            height: self.height,
            fps: self.fps,
            input,
            audio_path: self.audio_path.clone(),
            output_url: self.output_url(),
            limits: self.video_limits(),
            frame_queue: self.frame_queue,
        }
    }

    pub fn driver_opts(&self) -> DriverOpts {
        DriverOpts {
            cadence: self.cadence,
            fps: self.fps,
            frame_tolerance: Duration::from_millis(self.frame_tolerance_ms),
            tick: Duration::from_millis(self.tick_ms),
            poll_period: Duration::from_millis(self.poll_period_ms),
            poll_frame_path: self.poll_frame_path.clone(),
            channel_refresh: self.channel_refresh(),
            stream_refresh: self.stream_refresh(),
            restart: self.restart,
            restart_delay: Duration::from_millis(self.restart_delay_ms),
            shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
            sink: self.sink_config(),
        }
    }
}
