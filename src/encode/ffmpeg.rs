use std::{
    path::PathBuf,
    process::Stdio,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, Command},
    sync::{mpsc, oneshot},
};

use crate::{
    encode::sink::{
        EncoderExit, EncoderInput, EncoderLauncher, EncoderSession, SinkConfig, StopRequest,
    },
    foundation::{
        core::{FrameRGBA, mul_div255_u16},
        error::{StatcastError, StatcastResult},
    },
};

/// Launches the system `ffmpeg` publishing to an RTMP ingest endpoint.
#[derive(Clone, Debug)]
pub struct FfmpegLauncher {
    bin: PathBuf,
    /// Background used to flatten alpha (RGBA8, straight alpha).
    bg_rgba: [u8; 4],
}

impl FfmpegLauncher {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            bg_rgba: [0, 0, 0, 255],
        }
    }
}

#[async_trait]
impl EncoderLauncher for FfmpegLauncher {
    async fn launch(&mut self, cfg: &SinkConfig) -> StatcastResult<EncoderSession> {
        if cfg.fps == 0 {
            return Err(StatcastError::validation("fps must be non-zero"));
        }
        if !cfg.width.is_multiple_of(2) || !cfg.height.is_multiple_of(2) {
            return Err(StatcastError::validation(
                "encoder width/height must be even (required for yuv420p)",
            ));
        }

        let args = ffmpeg_args(cfg);
        tracing::debug!(bin = %self.bin.display(), ?args, "spawning encoder");

        let mut child = Command::new(&self.bin)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                StatcastError::startup(format!(
                    "failed to spawn '{}' (is it installed and on PATH?): {e}",
                    self.bin.display()
                ))
            })?;

        let pid = child.id();
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| StatcastError::encoder("failed to open encoder stdin (unexpected)"))?;
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(log_lines(stdout, Stream::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_lines(stderr, Stream::Stderr));
        }

        let (session, ends) = EncoderSession::channel(&cfg.input, cfg.frame_queue);
        let closing = Arc::new(AtomicBool::new(false));

        let stdin = match ends.frames {
            Some(frames) => {
                tokio::spawn(write_frames(
                    stdin,
                    frames,
                    self.bg_rgba,
                    Arc::clone(&closing),
                ));
                None
            }
            None => Some(stdin),
        };
        tokio::spawn(supervise(child, stdin, ends.stop, ends.exit, closing));

        tracing::info!(?pid, url = %redact(&cfg.output_url), "encoder started");
        Ok(session)
    }
}

/// Command-line arguments for one encoder process, in order.
pub fn ffmpeg_args(cfg: &SinkConfig) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "warning", "-nostats"]
        .into_iter()
        .map(String::from)
        .collect();

    match &cfg.input {
        EncoderInput::RawPipe => {
            args.extend(
                [
                    "-f",
                    "rawvideo",
                    "-pix_fmt",
                    "rgba",
                    "-s",
                    &format!("{}x{}", cfg.width, cfg.height),
                    "-r",
                    &cfg.fps.to_string(),
                    "-i",
                    "pipe:0",
                ]
                .map(String::from),
            );
        }
        EncoderInput::StillImage { path, input_fps } => {
            args.extend(
                [
                    "-f",
                    "image2",
                    "-loop",
                    "1",
                    "-framerate",
                    &input_fps.to_string(),
                    "-i",
                ]
                .map(String::from),
            );
            args.push(path.display().to_string());
        }
    }

    args.extend(["-stream_loop", "-1", "-i"].map(String::from));
    args.push(cfg.audio_path.display().to_string());

    let l = &cfg.limits;
    args.extend(
        [
            "-map",
            "0:v:0",
            "-map",
            "1:a:0",
            "-c:v",
            "libx264",
            "-preset",
            &l.preset,
            "-tune",
            "zerolatency",
            "-pix_fmt",
            "yuv420p",
            "-s",
            &format!("{}x{}", cfg.width, cfg.height),
            "-r",
            &cfg.fps.to_string(),
            "-g",
            &l.gop_frames.to_string(),
            "-b:v",
            &format!("{}k", l.bitrate_kbps),
            "-maxrate",
            &format!("{}k", l.maxrate_kbps),
            "-bufsize",
            &format!("{}k", l.bufsize_kbps),
            "-c:a",
            "aac",
            "-b:a",
            &format!("{}k", l.audio_bitrate_kbps),
            "-ar",
            "44100",
            "-f",
            "flv",
            &cfg.output_url,
        ]
        .map(String::from),
    );
    args
}

/// Hide the stream key (last path segment) in logs.
pub fn redact(url: &str) -> String {
    match url.rsplit_once('/') {
        Some((base, key)) if !key.is_empty() => format!("{base}/***"),
        _ => url.to_owned(),
    }
}

#[derive(Clone, Copy, Debug)]
enum Stream {
    Stdout,
    Stderr,
}

async fn log_lines(reader: impl AsyncRead + Unpin, stream: Stream) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => match stream {
                Stream::Stdout => tracing::info!(target: "statcast::ffmpeg", "{line}"),
                Stream::Stderr => tracing::warn!(target: "statcast::ffmpeg", "{line}"),
            },
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, ?stream, "encoder output closed");
                break;
            }
        }
    }
}

async fn write_frames(
    mut stdin: ChildStdin,
    mut frames: mpsc::Receiver<FrameRGBA>,
    bg_rgba: [u8; 4],
    closing: Arc<AtomicBool>,
) {
    let mut scratch = Vec::new();
    while let Some(frame) = frames.recv().await {
        scratch.resize(frame.data.len(), 0);
        let bytes: &[u8] = if frame.premultiplied {
            if let Err(e) = flatten_premul_over_bg_to_opaque_rgba8(&mut scratch, &frame.data, bg_rgba)
            {
                tracing::warn!(error = %e, "skipping malformed frame");
                continue;
            }
            &scratch
        } else {
            &frame.data
        };

        if let Err(e) = stdin.write_all(bytes).await {
            if stdin_error_level(closing.load(Ordering::Acquire)) == tracing::Level::DEBUG {
                tracing::debug!(error = %e, "encoder stdin closed during shutdown");
            } else {
                tracing::warn!(error = %e, kind = ?e.kind(), "failed to write frame to encoder stdin");
            }
            return;
        }
    }
    // Queue closed: end of input.
    if let Err(e) = stdin.shutdown().await {
        tracing::debug!(error = %e, "closing encoder stdin");
    }
}

/// Stdin write failures, broken pipes included, are only expected once shutdown began.
fn stdin_error_level(closing: bool) -> tracing::Level {
    if closing {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    }
}

async fn supervise(
    mut child: Child,
    stdin: Option<ChildStdin>,
    stop: oneshot::Receiver<StopRequest>,
    exit: oneshot::Sender<EncoderExit>,
    closing: Arc<AtomicBool>,
) {
    let request = tokio::select! {
        status = child.wait() => {
            let outcome = match status {
                Ok(s) => EncoderExit::Exited(s.code()),
                Err(e) => EncoderExit::Lost(e.to_string()),
            };
            let _ = exit.send(outcome);
            return;
        }
        req = stop => req.ok(),
    };
    closing.store(true, Ordering::Release);

    let Some(StopRequest { grace }) = request else {
        // Session dropped without a shutdown.
        let _ = child.kill().await;
        let _ = exit.send(EncoderExit::Killed);
        return;
    };

    if let Some(mut stdin) = stdin {
        // Still-image input: ask ffmpeg to quit interactively.
        if let Err(e) = stdin.write_all(b"q\n").await {
            tracing::debug!(error = %e, "encoder stdin closed before quit command");
        }
        drop(stdin);
    }

    let outcome = match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(s)) => EncoderExit::Exited(s.code()),
        Ok(Err(e)) => EncoderExit::Lost(e.to_string()),
        Err(_) => {
            tracing::warn!(grace_ms = grace.as_millis() as u64, "encoder ignored shutdown; killing");
            match child.kill().await {
                Ok(()) => EncoderExit::Killed,
                Err(e) => EncoderExit::Lost(e.to_string()),
            }
        }
    };
    let _ = exit.send(outcome);
}

fn flatten_premul_over_bg_to_opaque_rgba8(
    dst: &mut [u8],
    src_premul: &[u8],
    bg_rgba: [u8; 4],
) -> StatcastResult<()> {
    if dst.len() != src_premul.len() || !dst.len().is_multiple_of(4) {
        return Err(StatcastError::validation(
            "flatten_premul_over_bg_to_opaque_rgba8 expects equal-length rgba8 buffers",
        ));
    }

    let bg = [bg_rgba[0] as u16, bg_rgba[1] as u16, bg_rgba[2] as u16];
    for (d, s) in dst.chunks_exact_mut(4).zip(src_premul.chunks_exact(4)) {
        let a = s[3] as u16;
        if a == 255 {
            d.copy_from_slice(s);
            continue;
        }
        let inv = 255 - a;
        for c in 0..3 {
            d[c] = (s[c] as u16 + mul_div255_u16(bg[c], inv)).min(255) as u8;
        }
        d[3] = 255;
    }
    Ok(())
}

/// Return `true` when `bin` can be invoked.
pub async fn is_ffmpeg_available(bin: &std::path::Path) -> bool {
    Command::new(bin)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::sink::VideoLimits;

    fn cfg(input: EncoderInput) -> SinkConfig {
        SinkConfig {
            width: 1280,
            height: 720,
            fps: 30,
            input,
            audio_path: "audio.mp3".into(),
            output_url: "rtmp://a.rtmp.youtube.com/live2/abcd-key".to_owned(),
            limits: VideoLimits {
                preset: "veryfast".to_owned(),
                bitrate_kbps: 2500,
                maxrate_kbps: 2500,
                bufsize_kbps: 5000,
                audio_bitrate_kbps: 128,
                gop_frames: 60,
            },
            frame_queue: 2,
        }
    }

    fn window<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn stdin_errors_are_quiet_only_while_closing() {
        assert_eq!(stdin_error_level(true), tracing::Level::DEBUG);
        assert_eq!(stdin_error_level(false), tracing::Level::WARN);
    }

    #[test]
    fn raw_pipe_args_read_stdin_and_loop_audio() {
        let args = ffmpeg_args(&cfg(EncoderInput::RawPipe));
        assert_eq!(window(&args, "-i"), Some("pipe:0"));
        assert_eq!(window(&args, "-pix_fmt"), Some("rgba"));
        assert_eq!(window(&args, "-stream_loop"), Some("-1"));
        assert_eq!(window(&args, "-maxrate"), Some("2500k"));
        assert_eq!(window(&args, "-bufsize"), Some("5000k"));
        assert_eq!(window(&args, "-g"), Some("60"));
        assert_eq!(window(&args, "-f").unwrap(), "rawvideo");
        assert_eq!(
            args.last().map(String::as_str),
            Some("rtmp://a.rtmp.youtube.com/live2/abcd-key")
        );
        let audio_at = args.iter().position(|a| a == "audio.mp3").unwrap();
        assert_eq!(args[audio_at - 3], "-stream_loop");
    }

    #[test]
    fn still_image_args_loop_the_frame_file() {
        let args = ffmpeg_args(&cfg(EncoderInput::StillImage {
            path: "frame.png".into(),
            input_fps: 5,
        }));
        assert_eq!(window(&args, "-loop"), Some("1"));
        assert_eq!(window(&args, "-framerate"), Some("5"));
        assert_eq!(window(&args, "-i"), Some("frame.png"));
        assert!(!args.iter().any(|a| a == "pipe:0"));
        assert!(args.windows(2).any(|w| w[0] == "-f" && w[1] == "flv"));
    }

    #[test]
    fn stream_key_is_redacted() {
        assert_eq!(
            redact("rtmp://a.rtmp.youtube.com/live2/secret"),
            "rtmp://a.rtmp.youtube.com/live2/***"
        );
        assert_eq!(redact("no-slashes"), "no-slashes");
    }

    #[test]
    fn flatten_premul_alpha_0_returns_bg() {
        let src = vec![0u8, 0, 0, 0];
        let mut dst = vec![0u8; 4];
        flatten_premul_over_bg_to_opaque_rgba8(&mut dst, &src, [10, 20, 30, 255]).unwrap();
        assert_eq!(dst, vec![10, 20, 30, 255]);
    }

    #[test]
    fn flatten_half_alpha_blends() {
        let src = vec![100u8, 0, 0, 128];
        let mut dst = vec![0u8; 4];
        flatten_premul_over_bg_to_opaque_rgba8(&mut dst, &src, [0, 0, 200, 255]).unwrap();
        assert_eq!(dst[0], 100);
        assert!((99..=101).contains(&dst[2]));
        assert_eq!(dst[3], 255);
        assert!(flatten_premul_over_bg_to_opaque_rgba8(&mut dst, &[0; 8], [0; 4]).is_err());
    }

    #[tokio::test]
    async fn missing_binary_is_a_startup_error() {
        let mut launcher = FfmpegLauncher::new("/nonexistent/ffmpeg-statcast");
        let err = launcher.launch(&cfg(EncoderInput::RawPipe)).await.unwrap_err();
        assert!(matches!(err, StatcastError::Startup(_)));
        assert!(!is_ffmpeg_available(std::path::Path::new("/nonexistent/ffmpeg-statcast")).await);
    }
}
