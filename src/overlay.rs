use crate::{
    animator::{CounterKey, ValueAnimator},
    assets::PreparedImage,
    metrics::{ChannelStats, StreamStats},
};

/// Upper bound on [`OverlayState::settle`]; any u64 target converges well within it.
pub const MAX_SETTLE_TICKS: usize = 10_000;

/// Channel identity shown in the overlay header.
#[derive(Clone, Debug, Default)]
pub struct ChannelProfile {
    pub name: String,
    pub avatar: Option<PreparedImage>,
}

impl ChannelProfile {
    pub fn has_avatar(&self) -> bool {
        self.avatar.is_some()
    }
}

/// Everything the frame composer renders from. Owned by a single task.
#[derive(Clone, Debug, Default)]
pub struct OverlayState {
    pub counters: ValueAnimator,
    pub profile: ChannelProfile,
}

impl OverlayState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a successful channel refresh. An empty name keeps the previous one.
    pub fn apply_channel(&mut self, stats: &ChannelStats) {
        self.counters
            .set_target(CounterKey::Subscribers, &stats.subscribers);
        self.counters.set_target(CounterKey::TotalViews, &stats.views);
        self.counters.set_target(CounterKey::Videos, &stats.videos);
        if !stats.name.is_empty() {
            self.profile.name.clone_from(&stats.name);
        }
    }

    /// Apply a stream refresh. `None` means the refresh failed, which most likely means the
    /// broadcast ended, so live counters drop to zero instead of freezing.
    pub fn apply_stream(&mut self, stats: Option<&StreamStats>) {
        match stats {
            Some(s) => {
                self.counters.set_target(CounterKey::LiveViewers, &s.viewers);
                self.counters.set_target(CounterKey::Likes, &s.likes);
            }
            None => {
                self.counters.set_target_count(CounterKey::LiveViewers, 0);
                self.counters.set_target_count(CounterKey::Likes, 0);
            }
        }
    }

    /// Cache the first successfully loaded avatar; later ones are ignored.
    pub fn set_avatar(&mut self, avatar: PreparedImage) {
        if self.profile.avatar.is_none() {
            self.profile.avatar = Some(avatar);
        }
    }

    /// Advance every counter until it displays its target exactly, giving up after
    /// [`MAX_SETTLE_TICKS`].
    pub fn settle(&mut self) {
        for _ in 0..MAX_SETTLE_TICKS {
            if self.counters.is_settled() {
                return;
            }
            self.counters.tick();
        }
        tracing::warn!(ticks = MAX_SETTLE_TICKS, "counters did not settle");
    }
}
