use std::{
    collections::VecDeque,
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::json;
use statcast::{
    Cadence, Canvas, ChannelStats, CounterKey, DeliveryDriver, DriverOpts, DriverState,
    EncoderExit, EncoderInput, EncoderLauncher, EncoderSession, FrameComposer, FrameRGBA, MetricsFetcher, MetricsSource,
    OverlayState, PreparedImage, RestartPolicy, StatcastError, StatcastResult, StreamConfig,
    StreamStats, encode::sink::EncoderEnds,
};
use tokio::{sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug)]
enum Behavior {
    RunUntilStopped,
    ExitAfter(Duration, i32),
    /// Never reads its frame queue.
    Stall,
    FailLaunch,
}

#[derive(Default)]
struct Record {
    launches: AtomicUsize,
    frames: AtomicU64,
    stops: Mutex<Vec<Duration>>,
    /// Whether the watched input file existed at each launch.
    input_present: Mutex<Vec<bool>>,
}

struct FakeLauncher {
    script: VecDeque<Behavior>,
    record: Arc<Record>,
}

impl FakeLauncher {
    fn new(script: impl IntoIterator<Item = Behavior>) -> (Self, Arc<Record>) {
        let record = Arc::new(Record::default());
        (
            Self {
                script: script.into_iter().collect(),
                record: record.clone(),
            },
            record,
        )
    }
}

#[async_trait]
impl EncoderLauncher for FakeLauncher {
    async fn launch(&mut self, cfg: &statcast::SinkConfig) -> StatcastResult<EncoderSession> {
        self.record.launches.fetch_add(1, Ordering::SeqCst);
        let behavior = self.script.pop_front().unwrap_or(Behavior::RunUntilStopped);
        if let Behavior::FailLaunch = behavior {
            return Err(StatcastError::startup("no encoder"));
        }
        if let EncoderInput::StillImage { path, .. } = &cfg.input {
            self.record.input_present.lock().unwrap().push(path.exists());
        }
        let (session, ends) = EncoderSession::channel(&cfg.input, cfg.frame_queue);
        tokio::spawn(run_fake(behavior, ends, self.record.clone()));
        Ok(session)
    }
}

async fn recv_opt(frames: &mut Option<mpsc::Receiver<FrameRGBA>>) -> Option<FrameRGBA> {
    match frames {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn run_fake(behavior: Behavior, ends: EncoderEnds, record: Arc<Record>) {
    let EncoderEnds {
        mut frames,
        exit,
        mut stop,
    } = ends;
    let stalled = matches!(behavior, Behavior::Stall);
    let deadline = match behavior {
        Behavior::ExitAfter(after, _) => Some(Instant::now() + after),
        _ => None,
    };
    loop {
        tokio::select! {
            req = &mut stop => {
                if let Ok(req) = req {
                    record.stops.lock().unwrap().push(req.grace);
                }
                let _ = exit.send(EncoderExit::Exited(Some(0)));
                return;
            }
            _ = sleep_until_opt(deadline) => {
                let code = match behavior {
                    Behavior::ExitAfter(_, code) => code,
                    _ => 0,
                };
                let _ = exit.send(EncoderExit::Exited(Some(code)));
                return;
            }
            frame = recv_opt(&mut frames), if !stalled => match frame {
                Some(_) => {
                    record.frames.fetch_add(1, Ordering::SeqCst);
                }
                None => frames = None,
            },
        }
    }
}

#[derive(Default)]
struct CountingSource {
    channel_calls: AtomicUsize,
    stream_calls: AtomicUsize,
    stall_stream: bool,
    /// Stream calls from this index on fail.
    fail_stream_from: Option<usize>,
}

#[async_trait]
impl MetricsSource for CountingSource {
    async fn channel_stats(&self) -> StatcastResult<ChannelStats> {
        let n = self.channel_calls.fetch_add(1, Ordering::SeqCst) as u64;
        Ok(ChannelStats {
            name: "Counting".to_owned(),
            avatar_url: String::new(),
            subscribers: json!(1000 + n),
            views: json!(5000),
            videos: json!(12),
        })
    }

    async fn stream_stats(&self) -> StatcastResult<StreamStats> {
        let n = self.stream_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_stream_from.is_some_and(|from| n >= from) {
            return Err(StatcastError::fetch("stream ended"));
        }
        if self.stall_stream {
            std::future::pending::<()>().await;
        }
        Ok(StreamStats {
            viewers: json!(42),
            likes: json!(7),
        })
    }

    async fn avatar(&self, _url: &str, _diameter: u32) -> StatcastResult<PreparedImage> {
        Err(StatcastError::fetch("no avatars here"))
    }
}

fn opts(tweak: impl FnOnce(&mut StreamConfig)) -> DriverOpts {
    let mut cfg = StreamConfig {
        width: 160,
        height: 90,
        fps: 10,
        tick_ms: 20,
        channel_id: "c".to_owned(),
        stream_id: "s".to_owned(),
        stream_key: "k".to_owned(),
        ..StreamConfig::default()
    };
    tweak(&mut cfg);
    cfg.driver_opts()
}

fn driver(
    opts: DriverOpts,
    source: Arc<CountingSource>,
    launcher: FakeLauncher,
) -> (DeliveryDriver, CancellationToken) {
    let token = CancellationToken::new();
    let canvas = Canvas::new(opts.sink.width, opts.sink.height).unwrap();
    let fetcher = MetricsFetcher::new(source, Duration::from_secs(3), 8);
    let driver = DeliveryDriver::new(
        opts,
        FrameComposer::new(canvas, None),
        fetcher,
        Box::new(launcher),
        token.clone(),
    );
    (driver, token)
}

async fn run_for(
    driver: DeliveryDriver,
    token: CancellationToken,
    d: Duration,
) -> StatcastResult<statcast::DriverReport> {
    let (report, ()) = tokio::join!(driver.run(OverlayState::new()), async move {
        tokio::time::sleep(d).await;
        token.cancel();
    });
    report
}

#[tokio::test(start_paused = true)]
async fn restarts_after_unexpected_exit_and_stops_gracefully() {
    let (launcher, record) = FakeLauncher::new([Behavior::ExitAfter(Duration::from_secs(1), 1)]);
    let (driver, token) = driver(opts(|_| {}), Arc::default(), launcher);

    let report = run_for(driver, token, Duration::from_secs(10)).await.unwrap();

    assert_eq!(report.restarts, 1);
    assert_eq!(record.launches.load(Ordering::SeqCst), 2);
    assert_eq!(report.final_state, DriverState::Stopped);
    assert!(report.encoder_failure.is_none());
    assert!(report.frames_delivered > 0);
    assert_eq!(report.frames_dropped, 0);
    assert_eq!(*record.stops.lock().unwrap(), vec![Duration::from_secs(5)]);
}

#[tokio::test(start_paused = true)]
async fn fail_fast_ends_the_run_with_the_exit() {
    let (launcher, record) =
        FakeLauncher::new([Behavior::ExitAfter(Duration::from_millis(500), 1)]);
    let (driver, _token) = driver(
        opts(|c| c.restart = RestartPolicy::FailFast),
        Arc::default(),
        launcher,
    );

    let report = driver.run(OverlayState::new()).await.unwrap();

    assert_eq!(report.encoder_failure, Some(EncoderExit::Exited(Some(1))));
    assert_eq!(report.restarts, 0);
    assert_eq!(report.final_state, DriverState::Stopped);
    assert_eq!(record.launches.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn first_launch_failure_is_fatal() {
    let (launcher, _record) = FakeLauncher::new([Behavior::FailLaunch]);
    let (driver, _token) = driver(opts(|_| {}), Arc::default(), launcher);

    let err = driver.run(OverlayState::new()).await.unwrap_err();
    assert!(matches!(err, StatcastError::Startup(_)));
}

#[tokio::test(start_paused = true)]
async fn failed_relaunches_are_retried() {
    let (launcher, record) = FakeLauncher::new([
        Behavior::ExitAfter(Duration::from_secs(1), 1),
        Behavior::FailLaunch,
        Behavior::RunUntilStopped,
    ]);
    let (driver, token) = driver(
        opts(|c| c.restart_delay_ms = 1000),
        Arc::default(),
        launcher,
    );

    let report = run_for(driver, token, Duration::from_secs(6)).await.unwrap();

    assert_eq!(record.launches.load(Ordering::SeqCst), 3);
    assert_eq!(report.restarts, 1);
}

#[tokio::test(start_paused = true)]
async fn full_queue_drops_instead_of_buffering() {
    let (launcher, record) = FakeLauncher::new([Behavior::Stall]);
    let (driver, token) = driver(opts(|c| c.frame_queue = 2), Arc::default(), launcher);

    let report = run_for(driver, token, Duration::from_secs(2)).await.unwrap();

    assert_eq!(report.frames_delivered, 2);
    assert!(report.frames_dropped > 10, "dropped {}", report.frames_dropped);
    assert_eq!(record.frames.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn push_cadence_tracks_the_frame_rate() {
    let (launcher, record) = FakeLauncher::new([]);
    let (driver, token) = driver(
        opts(|c| {
            c.fps = 10;
            c.tick_ms = 5;
        }),
        Arc::default(),
        launcher,
    );

    let report = run_for(driver, token, Duration::from_secs(3)).await.unwrap();

    // 10 fps with a 5 ms tolerance: one frame every 95-100 ms.
    assert!(
        (28..=33).contains(&report.frames_delivered),
        "delivered {}",
        report.frames_delivered
    );
    tokio::task::yield_now().await;
    assert!(record.frames.load(Ordering::SeqCst) >= report.frames_delivered - 2);
}

#[tokio::test(start_paused = true)]
async fn refresh_timers_run_independently() {
    let source = Arc::new(CountingSource::default());
    let (launcher, _record) = FakeLauncher::new([]);
    let (driver, token) = driver(
        opts(|c| {
            c.fps = 1;
            c.tick_ms = 100;
        }),
        source.clone(),
        launcher,
    );

    run_for(driver, token, Duration::from_millis(61_000))
        .await
        .unwrap();

    assert_eq!(source.stream_calls.load(Ordering::SeqCst), 12);
    assert_eq!(source.channel_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn stalled_refresh_is_not_restarted_while_in_flight() {
    let source = Arc::new(CountingSource {
        stall_stream: true,
        ..Default::default()
    });
    let (launcher, _record) = FakeLauncher::new([]);
    let mut opts = opts(|c| c.fps = 5);
    opts.stream_refresh = Duration::from_secs(2);
    let (driver, token) = driver(opts, source.clone(), launcher);

    let report = run_for(driver, token, Duration::from_millis(9_500))
        .await
        .unwrap();

    // Ticks at 2, 4, 6 and 8 s; each attempt times out after 3 s, so 4 s and 8 s are skipped.
    assert_eq!(source.stream_calls.load(Ordering::SeqCst), 2);
    // Rendering kept going while the fetches hung.
    assert!(report.frames_delivered >= 40, "delivered {}", report.frames_delivered);
}

#[tokio::test(start_paused = true)]
async fn poll_cadence_rewrites_the_frame_file() {
    let dir = PathBuf::from("target").join("driver_poll");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("frame.png");
    let _ = std::fs::remove_file(&path);

    let (launcher, record) = FakeLauncher::new([]);
    let (driver, token) = driver(
        opts(|c| {
            c.cadence = Cadence::Poll;
            c.poll_period_ms = 200;
            c.poll_frame_path = path.clone();
        }),
        Arc::default(),
        launcher,
    );

    let report = run_for(driver, token, Duration::from_millis(1_100))
        .await
        .unwrap();

    assert!(report.frames_delivered >= 4, "delivered {}", report.frames_delivered);
    assert_eq!(*record.input_present.lock().unwrap(), vec![true]);
    let img = image::open(&path).unwrap();
    assert_eq!((img.width(), img.height()), (160, 90));
}

fn channel_overlay() -> OverlayState {
    let mut overlay = OverlayState::new();
    overlay.apply_channel(&ChannelStats {
        name: "Counting".to_owned(),
        avatar_url: String::new(),
        subscribers: json!(1000),
        views: json!(5000),
        videos: json!(12),
    });
    overlay.settle();
    overlay
}

async fn run_overlay_for(
    driver: DeliveryDriver,
    token: CancellationToken,
    overlay: OverlayState,
    d: Duration,
) -> statcast::DriverReport {
    let (report, ()) = tokio::join!(driver.run(overlay), async move {
        tokio::time::sleep(d).await;
        token.cancel();
    });
    report.unwrap()
}

#[tokio::test(start_paused = true)]
async fn stream_refresh_shows_live_counters() {
    let source = Arc::new(CountingSource {
        fail_stream_from: Some(1),
        ..Default::default()
    });
    let (launcher, _record) = FakeLauncher::new([]);
    let (driver, token) = driver(opts(|_| {}), source.clone(), launcher);

    // One stream refresh at 5 s, then 3 s of frames to settle.
    let report = run_overlay_for(driver, token, channel_overlay(), Duration::from_secs(8)).await;

    assert_eq!(source.stream_calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.displayed, [1000, 5000, 12, 42, 7]);
}

#[tokio::test(start_paused = true)]
async fn failed_stream_refresh_zeroes_live_counters_in_the_loop() {
    let source = Arc::new(CountingSource {
        fail_stream_from: Some(1),
        ..Default::default()
    });
    let (launcher, _record) = FakeLauncher::new([]);
    let (driver, token) = driver(opts(|_| {}), source.clone(), launcher);

    // Success at 5 s, failure at 10 s, then 4 s of frames to settle back to zero.
    let report = run_overlay_for(driver, token, channel_overlay(), Duration::from_secs(14)).await;

    // The second refresh only starts if the first one's join cleared its in-flight slot.
    assert_eq!(source.stream_calls.load(Ordering::SeqCst), 2);
    assert_eq!(report.displayed[CounterKey::LiveViewers.index()], 0);
    assert_eq!(report.displayed[CounterKey::Likes.index()], 0);
    assert_eq!(report.displayed, [1000, 5000, 12, 0, 0]);
}
