use std::{future::Future, sync::Arc, time::Duration};

use crate::{
    assets::PreparedImage,
    foundation::error::{StatcastError, StatcastResult},
    metrics::{
        document::{ChannelStats, StreamStats},
        source::MetricsSource,
    },
    overlay::OverlayState,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchKind {
    Channel,
    Stream,
}

/// Result of one refresh attempt, produced off the render loop and applied on it.
#[derive(Debug)]
pub enum FetchOutcome {
    Channel {
        stats: StatcastResult<ChannelStats>,
        /// `None` when no avatar load was attempted.
        avatar: Option<StatcastResult<PreparedImage>>,
    },
    Stream(StatcastResult<StreamStats>),
}

impl FetchOutcome {
    pub fn kind(&self) -> FetchKind {
        match self {
            FetchOutcome::Channel { .. } => FetchKind::Channel,
            FetchOutcome::Stream(_) => FetchKind::Stream,
        }
    }

    /// Fold the outcome into the overlay state.
    ///
    /// A failed channel refresh changes nothing; a failed stream refresh zeroes the live
    /// counters. Avatar failures are logged and leave the avatar unset.
    pub fn apply(self, state: &mut OverlayState) {
        match self {
            FetchOutcome::Channel { stats, avatar } => {
                match stats {
                    Ok(stats) => {
                        state.apply_channel(&stats);
                        tracing::debug!(
                            name = %stats.name,
                            subscribers = %stats.subscribers,
                            views = %stats.views,
                            videos = %stats.videos,
                            "channel stats refreshed"
                        );
                    }
                    Err(e) => log_failure(&e, "channel refresh failed; keeping previous values"),
                }
                match avatar {
                    Some(Ok(img)) => {
                        tracing::info!(width = img.width, height = img.height, "avatar loaded");
                        state.set_avatar(img);
                    }
                    Some(Err(e)) => log_failure(&e, "avatar load failed; will retry on a later refresh"),
                    None => {}
                }
            }
            FetchOutcome::Stream(Ok(stats)) => {
                tracing::debug!(viewers = %stats.viewers, likes = %stats.likes, "stream stats refreshed");
                state.apply_stream(Some(&stats));
            }
            FetchOutcome::Stream(Err(e)) => {
                log_failure(&e, "stream refresh failed; live counters reset to zero");
                state.apply_stream(None);
            }
        }
    }
}

/// Network, timeout and document errors are routine; anything else is logged as an error.
fn log_failure(e: &StatcastError, msg: &str) {
    if e.is_transient() {
        tracing::warn!(error = %e, "{msg}");
    } else {
        tracing::error!(error = %e, "{msg}");
    }
}

/// Issues refreshes against a [`MetricsSource`] with a hard per-request timeout.
#[derive(Clone)]
pub struct MetricsFetcher {
    source: Arc<dyn MetricsSource>,
    timeout: Duration,
    avatar_diameter: u32,
}

impl MetricsFetcher {
    pub fn new(source: Arc<dyn MetricsSource>, timeout: Duration, avatar_diameter: u32) -> Self {
        Self {
            source,
            timeout,
            avatar_diameter,
        }
    }

    /// Fetch channel aggregates, plus the avatar when `want_avatar` is set and the response
    /// names one.
    pub async fn fetch_channel(&self, want_avatar: bool) -> FetchOutcome {
        let stats = self.bounded(self.source.channel_stats()).await;
        let avatar = match &stats {
            Ok(s) if want_avatar && !s.avatar_url.is_empty() => Some(
                self.bounded(self.source.avatar(&s.avatar_url, self.avatar_diameter))
                    .await,
            ),
            _ => None,
        };
        FetchOutcome::Channel { stats, avatar }
    }

    pub async fn fetch_stream(&self) -> FetchOutcome {
        FetchOutcome::Stream(self.bounded(self.source.stream_stats()).await)
    }

    async fn bounded<T>(&self, fut: impl Future<Output = StatcastResult<T>>) -> StatcastResult<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(StatcastError::Timeout(self.timeout.as_millis() as u64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::animator::CounterKey;

    #[derive(Default)]
    struct Scripted {
        channel: Mutex<Vec<StatcastResult<ChannelStats>>>,
        stream: Mutex<Vec<StatcastResult<StreamStats>>>,
        avatar_calls: AtomicUsize,
        avatar_fails: bool,
    }

    #[async_trait]
    impl MetricsSource for Scripted {
        async fn channel_stats(&self) -> StatcastResult<ChannelStats> {
            self.channel.lock().unwrap().remove(0)
        }

        async fn stream_stats(&self) -> StatcastResult<StreamStats> {
            let next = self.stream.lock().unwrap().pop();
            match next {
                Some(r) => r,
                None => std::future::pending().await,
            }
        }

        async fn avatar(&self, _url: &str, diameter: u32) -> StatcastResult<PreparedImage> {
            self.avatar_calls.fetch_add(1, Ordering::SeqCst);
            if self.avatar_fails {
                return Err(StatcastError::decode("bad image"));
            }
            Ok(PreparedImage {
                width: diameter,
                height: diameter,
                rgba8_premul: Arc::new(vec![255; (diameter * diameter * 4) as usize]),
            })
        }
    }

    fn channel(subs: u64) -> StatcastResult<ChannelStats> {
        Ok(ChannelStats {
            name: "Chan".to_string(),
            avatar_url: "http://x/a.png".to_string(),
            subscribers: json!(subs),
            views: json!(subs * 2),
            videos: json!(4),
        })
    }

    fn fetcher(source: Arc<Scripted>) -> MetricsFetcher {
        MetricsFetcher::new(source, Duration::from_secs(3), 8)
    }

    async fn refresh_channel(f: &MetricsFetcher, state: &mut OverlayState) {
        let want_avatar = !state.profile.has_avatar();
        f.fetch_channel(want_avatar).await.apply(state);
    }

    #[tokio::test(start_paused = true)]
    async fn channel_failure_keeps_stale_values() {
        let source = Arc::new(Scripted::default());
        *source.channel.lock().unwrap() = vec![channel(10), Err(StatcastError::fetch("down"))];
        let f = fetcher(source.clone());
        let mut state = OverlayState::new();

        refresh_channel(&f, &mut state).await;
        refresh_channel(&f, &mut state).await;

        assert_eq!(state.profile.name, "Chan");
        assert_eq!(state.counters.target(CounterKey::Subscribers), 10);
        assert_eq!(state.counters.target(CounterKey::TotalViews), 20);
        assert_eq!(state.counters.target(CounterKey::Videos), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn avatar_loaded_at_most_once() {
        let source = Arc::new(Scripted::default());
        *source.channel.lock().unwrap() = vec![channel(1), channel(2), channel(3)];
        let f = fetcher(source.clone());
        let mut state = OverlayState::new();

        for _ in 0..3 {
            refresh_channel(&f, &mut state).await;
        }
        assert_eq!(source.avatar_calls.load(Ordering::SeqCst), 1);
        assert!(state.profile.has_avatar());
    }

    #[tokio::test(start_paused = true)]
    async fn avatar_failure_is_retried_later() {
        let source = Arc::new(Scripted {
            avatar_fails: true,
            ..Default::default()
        });
        *source.channel.lock().unwrap() = vec![channel(1), channel(2)];
        let f = fetcher(source.clone());
        let mut state = OverlayState::new();

        refresh_channel(&f, &mut state).await;
        refresh_channel(&f, &mut state).await;
        assert_eq!(source.avatar_calls.load(Ordering::SeqCst), 2);
        assert!(!state.profile.has_avatar());
        assert_eq!(state.counters.target(CounterKey::Subscribers), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_stream_times_out_and_zeroes() {
        let source = Arc::new(Scripted::default());
        let f = fetcher(source);
        let mut state = OverlayState::new();
        state.counters.set_target_count(CounterKey::LiveViewers, 500);
        state.counters.set_target_count(CounterKey::Likes, 50);
        state.settle();

        let started = tokio::time::Instant::now();
        let outcome = f.fetch_stream().await;
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(matches!(outcome, FetchOutcome::Stream(Err(StatcastError::Timeout(3000)))));

        outcome.apply(&mut state);
        state.settle();
        assert_eq!(state.counters.displayed(CounterKey::LiveViewers), 0);
        assert_eq!(state.counters.displayed(CounterKey::Likes), 0);
    }
}
