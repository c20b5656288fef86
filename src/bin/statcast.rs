use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use statcast::{
    App, Cadence, RestartPolicy, ShutdownHandle, StreamConfig, encode::save_png,
    metrics::HttpMetricsSource,
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "statcast", version, about = "Live channel statistics overlay streamer")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream the overlay until Ctrl-C or SIGTERM.
    Stream(StreamArgs),
    /// Render a single overlay frame as a PNG.
    Frame(FrameArgs),
}

/// Overrides applied on top of the defaults and the config file.
#[derive(Args, Debug)]
struct ConfigArgs {
    /// JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    channel_id: Option<String>,

    #[arg(long)]
    stream_id: Option<String>,

    /// Stream key appended to the ingest url.
    #[arg(long, env = "STATCAST_STREAM_KEY", hide_env_values = true)]
    stream_key: Option<String>,

    #[arg(long)]
    ingest_url: Option<String>,

    /// Looping audio track.
    #[arg(long)]
    audio: Option<PathBuf>,

    #[arg(long)]
    font: Option<PathBuf>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    #[arg(long)]
    fps: Option<u32>,

    #[arg(long, value_enum)]
    cadence: Option<Cadence>,

    #[arg(long, value_enum)]
    restart: Option<RestartPolicy>,

    /// Path or name of the ffmpeg binary.
    #[arg(long)]
    ffmpeg: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct StreamArgs {
    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(Args, Debug)]
struct FrameArgs {
    #[command(flatten)]
    config: ConfigArgs,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,

    /// Render zeroed counters without contacting the counter API.
    #[arg(long, default_value_t = false)]
    no_fetch: bool,
}

impl ConfigArgs {
    fn resolve(self) -> anyhow::Result<StreamConfig> {
        let mut cfg = match &self.config {
            Some(path) => StreamConfig::from_path(path)?,
            None => StreamConfig::default(),
        };
        macro_rules! set {
            ($($field:ident <- $arg:expr),* $(,)?) => {
                $(if let Some(v) = $arg { cfg.$field = v; })*
            };
        }
        set!(
            channel_id <- self.channel_id,
            stream_id <- self.stream_id,
            stream_key <- self.stream_key,
            ingest_url <- self.ingest_url,
            audio_path <- self.audio,
            width <- self.width,
            height <- self.height,
            fps <- self.fps,
            cadence <- self.cadence,
            restart <- self.restart,
            ffmpeg_bin <- self.ffmpeg,
        );
        if self.font.is_some() {
            cfg.font_path = self.font;
        }
        Ok(cfg)
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("statcast=info")))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.cmd {
        Command::Stream(args) => cmd_stream(args).await,
        Command::Frame(args) => cmd_frame(args).await,
    }
}

async fn cmd_stream(args: StreamArgs) -> anyhow::Result<()> {
    let app = App::new(args.config.resolve()?).context("invalid configuration")?;
    tokio::spawn(forward_signals(app.shutdown_handle()));

    let report = app.run().await?;
    tracing::info!(
        delivered = report.frames_delivered,
        dropped = report.frames_dropped,
        restarts = report.restarts,
        "stream ended"
    );
    Ok(())
}

async fn cmd_frame(args: FrameArgs) -> anyhow::Result<()> {
    let mut cfg = args.config.resolve()?;
    if !args.no_fetch && (cfg.channel_id.is_empty() || cfg.stream_id.is_empty()) {
        anyhow::bail!("--channel-id and --stream-id are required unless --no-fetch is given");
    }
    // A preview publishes nothing; placeholders satisfy validation.
    for field in [&mut cfg.channel_id, &mut cfg.stream_id, &mut cfg.stream_key] {
        if field.is_empty() {
            field.push_str("preview");
        }
    }
    let app = App::new(cfg).context("invalid configuration")?;

    let source = if args.no_fetch {
        None
    } else {
        let source = HttpMetricsSource::new(app.config().endpoints(), app.config().fetch_timeout())?;
        Some(Arc::new(source) as Arc<dyn statcast::MetricsSource>)
    };
    let frame = app.preview(source).await?;
    save_png(&args.out, &frame)?;
    tracing::info!(out = %args.out.display(), "frame written");
    Ok(())
}

async fn forward_signals(handle: ShutdownHandle) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    handle.shutdown();
}
