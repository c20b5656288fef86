use std::{fmt, path::PathBuf, time::Duration};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::foundation::{
    core::FrameRGBA,
    error::StatcastResult,
};

/// How frames reach the encoder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EncoderInput {
    /// Raw RGBA frames written to the encoder's stdin at `fps`.
    RawPipe,
    /// A still image re-read by the encoder at `input_fps`.
    StillImage { path: PathBuf, input_fps: u32 },
}

/// H.264/AAC output settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoLimits {
    pub preset: String,
    pub bitrate_kbps: u32,
    pub maxrate_kbps: u32,
    pub bufsize_kbps: u32,
    pub audio_bitrate_kbps: u32,
    pub gop_frames: u32,
}

/// Everything an [`EncoderLauncher`] needs to start one encoder process.
#[derive(Clone, Debug)]
pub struct SinkConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub input: EncoderInput,
    /// Looped indefinitely as the audio track.
    pub audio_path: PathBuf,
    /// Full publish URL, `ingest_url/stream_key`.
    pub output_url: String,
    pub limits: VideoLimits,
    /// Capacity of the frame queue in front of the stdin writer.
    pub frame_queue: usize,
}

/// Result of handing one frame to the encoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// The frame is queued for the encoder.
    Sent,
    /// The queue was full; the frame was discarded.
    Dropped,
    /// The encoder no longer accepts frames.
    Closed,
}

/// How an encoder process ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EncoderExit {
    /// The process exited on its own; `None` when terminated by a signal.
    Exited(Option<i32>),
    /// Killed after the shutdown grace period ran out.
    Killed,
    /// The process could not be observed any more.
    Lost(String),
}

impl EncoderExit {
    pub fn is_clean(&self) -> bool {
        matches!(self, EncoderExit::Exited(Some(0)))
    }
}

impl fmt::Display for EncoderExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncoderExit::Exited(Some(code)) => write!(f, "exited with code {code}"),
            EncoderExit::Exited(None) => write!(f, "terminated by signal"),
            EncoderExit::Killed => write!(f, "killed after shutdown grace period"),
            EncoderExit::Lost(reason) => write!(f, "lost: {reason}"),
        }
    }
}

/// Graceful stop request sent to the process supervisor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StopRequest {
    pub grace: Duration,
}

/// Driver-side handle of a running encoder.
///
/// Frames go through a bounded queue; the exit status and stop request travel over one-shot
/// channels so a launcher only has to service the [`EncoderEnds`] it gets from
/// [`EncoderSession::channel`].
#[derive(Debug)]
pub struct EncoderSession {
    frames: Option<mpsc::Sender<FrameRGBA>>,
    exit: oneshot::Receiver<EncoderExit>,
    stop: Option<oneshot::Sender<StopRequest>>,
    exited: Option<EncoderExit>,
}

/// Process-side ends of an [`EncoderSession`].
#[derive(Debug)]
pub struct EncoderEnds {
    /// `None` for still-image input, which takes no frames.
    pub frames: Option<mpsc::Receiver<FrameRGBA>>,
    pub exit: oneshot::Sender<EncoderExit>,
    pub stop: oneshot::Receiver<StopRequest>,
}

impl EncoderSession {
    pub fn channel(input: &EncoderInput, frame_queue: usize) -> (Self, EncoderEnds) {
        let (frames_tx, frames_rx) = match input {
            EncoderInput::RawPipe => {
                let (tx, rx) = mpsc::channel(frame_queue.max(1));
                (Some(tx), Some(rx))
            }
            EncoderInput::StillImage { .. } => (None, None),
        };
        let (exit_tx, exit_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        (
            Self {
                frames: frames_tx,
                exit: exit_rx,
                stop: Some(stop_tx),
                exited: None,
            },
            EncoderEnds {
                frames: frames_rx,
                exit: exit_tx,
                stop: stop_rx,
            },
        )
    }

    /// Queue a frame without waiting. A full queue drops the frame.
    pub fn deliver(&self, frame: FrameRGBA) -> Delivery {
        let Some(tx) = self.frames.as_ref() else {
            return Delivery::Closed;
        };
        match tx.try_send(frame) {
            Ok(()) => Delivery::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Dropped,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Resolve when the encoder process ends. Cancel-safe.
    pub async fn wait_exit(&mut self) -> EncoderExit {
        if let Some(exit) = &self.exited {
            return exit.clone();
        }
        let exit = (&mut self.exit)
            .await
            .unwrap_or_else(|_| EncoderExit::Lost("supervisor went away".to_owned()));
        self.exited = Some(exit.clone());
        exit
    }

    /// Close the frame queue, ask the supervisor to stop the process within `grace`, and wait
    /// for it to report back.
    pub async fn shutdown(mut self, grace: Duration) -> EncoderExit {
        drop(self.frames.take());
        if let Some(exit) = &self.exited {
            return exit.clone();
        }
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(StopRequest { grace });
        }
        // The supervisor kills the process at `grace`; the extra second covers the kill itself.
        match tokio::time::timeout(grace + Duration::from_secs(1), self.wait_exit()).await {
            Ok(exit) => exit,
            Err(_) => EncoderExit::Lost("no exit reported after shutdown".to_owned()),
        }
    }
}

/// Starts encoder processes.
#[async_trait]
pub trait EncoderLauncher: Send {
    async fn launch(&mut self, cfg: &SinkConfig) -> StatcastResult<EncoderSession>;
}
