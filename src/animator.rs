//! Exponential smoothing of fetched counters into displayable values.
//!
//! Targets come from the metrics fetcher at 5-60 s intervals; `current` is advanced once per
//! rendered frame so the overlay glides between fetched values instead of jumping.

use serde_json::Value;

/// Fraction of the remaining gap closed on every tick.
pub const SMOOTHING_FACTOR: f64 = 0.15;

/// Once the remaining gap is at most this, `current` snaps to `target`.
pub const SNAP_THRESHOLD: f64 = 1.0;

/// The five counters shown on the overlay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CounterKey {
    /// Channel subscriber count.
    Subscribers,
    /// Lifetime channel views.
    TotalViews,
    /// Uploaded video count.
    Videos,
    /// Concurrent viewers of the live broadcast.
    LiveViewers,
    /// Likes on the live broadcast.
    Likes,
}

impl CounterKey {
    pub const COUNT: usize = 5;

    /// All keys in card order.
    pub const ALL: [CounterKey; Self::COUNT] = [
        CounterKey::Subscribers,
        CounterKey::TotalViews,
        CounterKey::Videos,
        CounterKey::LiveViewers,
        CounterKey::Likes,
    ];

    pub fn index(self) -> usize {
        match self {
            CounterKey::Subscribers => 0,
            CounterKey::TotalViews => 1,
            CounterKey::Videos => 2,
            CounterKey::LiveViewers => 3,
            CounterKey::Likes => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CounterKey::Subscribers => "subscribers",
            CounterKey::TotalViews => "total_views",
            CounterKey::Videos => "videos",
            CounterKey::LiveViewers => "live_viewers",
            CounterKey::Likes => "likes",
        }
    }
}

/// One animated counter.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Counter {
    /// Value shown on screen, moved toward `target` once per frame.
    pub current: f64,
    /// Last fetched value.
    pub target: u64,
}

impl Counter {
    fn step(&mut self) {
        let target = self.target as f64;
        let next = self.current + (target - self.current) * SMOOTHING_FACTOR;
        // Past 2^53 the step can round away entirely; a stalled step snaps too.
        if (target - next).abs() <= SNAP_THRESHOLD || next == self.current {
            self.current = target;
        } else {
            self.current = next;
        }
    }

    /// `current` rounded to the nearest whole count.
    pub fn displayed(&self) -> u64 {
        self.current.round().max(0.0) as u64
    }
}

/// Current/target pairs for every [`CounterKey`], all starting at zero.
#[derive(Clone, Debug, Default)]
pub struct ValueAnimator {
    counters: [Counter; CounterKey::COUNT],
}

impl ValueAnimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a raw fetched value as the counter's target. `current` is left alone.
    pub fn set_target(&mut self, key: CounterKey, raw: &Value) {
        self.set_target_count(key, coerce_count(raw));
    }

    pub fn set_target_count(&mut self, key: CounterKey, target: u64) {
        self.counters[key.index()].target = target;
    }

    /// Advance every counter one frame toward its target.
    pub fn tick(&mut self) {
        for c in &mut self.counters {
            c.step();
        }
    }

    pub fn counter(&self, key: CounterKey) -> Counter {
        self.counters[key.index()]
    }

    pub fn target(&self, key: CounterKey) -> u64 {
        self.counters[key.index()].target
    }

    pub fn displayed(&self, key: CounterKey) -> u64 {
        self.counters[key.index()].displayed()
    }

    /// `true` when every counter shows its target exactly.
    pub fn is_settled(&self) -> bool {
        self.counters.iter().all(|c| c.current == c.target as f64)
    }
}

/// Coerce a JSON value to a non-negative integer count.
///
/// Numbers truncate toward zero and clamp at 0; numeric strings may carry whitespace and
/// `,`/`_` digit separators. Everything else is 0.
pub fn coerce_count(raw: &Value) -> u64 {
    match raw {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                u
            } else if let Some(f) = n.as_f64() {
                clamp_f64(f)
            } else {
                0
            }
        }
        Value::String(s) => {
            let cleaned: String = s
                .trim()
                .chars()
                .filter(|c| *c != ',' && *c != '_')
                .collect();
            if let Ok(u) = cleaned.parse::<u64>() {
                u
            } else {
                cleaned.parse::<f64>().map(clamp_f64).unwrap_or(0)
            }
        }
        _ => 0,
    }
}

fn clamp_f64(f: f64) -> u64 {
    if !f.is_finite() || f <= 0.0 {
        return 0;
    }
    f.trunc().min(u64::MAX as f64) as u64
}
