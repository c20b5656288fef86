use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// How rendered frames reach the encoder.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    /// Raw frames streamed into the encoder's stdin at the target frame rate.
    #[default]
    Push,
    /// A still PNG rewritten periodically and re-read by the encoder.
    Poll,
}

/// Gates push-cadence render steps so they run at most once per frame interval.
///
/// The scheduling tick is finer than the frame interval; a step runs only when at least
/// `1000/fps - tolerance` ms passed since the last step that ran.
#[derive(Clone, Debug)]
pub struct FrameThrottle {
    min_gap: Duration,
    last: Option<Instant>,
}

impl FrameThrottle {
    pub fn new(fps: u32, tolerance: Duration) -> Self {
        let interval = Duration::from_secs_f64(1.0 / f64::from(fps.max(1)));
        Self {
            min_gap: interval.saturating_sub(tolerance),
            last: None,
        }
    }

    pub fn min_gap(&self) -> Duration {
        self.min_gap
    }

    /// Return `true` and record `now` if a step may run at `now`.
    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.min_gap => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gap_is_frame_interval_minus_tolerance() {
        let t = FrameThrottle::new(30, Duration::from_millis(5));
        let ms = t.min_gap().as_secs_f64() * 1000.0;
        assert!((ms - (1000.0 / 30.0 - 5.0)).abs() < 1e-6);
        assert_eq!(
            FrameThrottle::new(1000, Duration::from_millis(5)).min_gap(),
            Duration::ZERO
        );
    }

    #[tokio::test(start_paused = true)]
    async fn steps_are_spaced_by_the_gap() {
        let mut t = FrameThrottle::new(30, Duration::from_millis(5));
        let start = Instant::now();
        assert!(t.ready(start));
        assert!(!t.ready(start + Duration::from_millis(5)));
        assert!(!t.ready(start + Duration::from_millis(28)));
        assert!(t.ready(start + Duration::from_millis(29)));
        assert!(!t.ready(start + Duration::from_millis(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn five_ms_ticks_yield_roughly_the_target_rate() {
        let mut t = FrameThrottle::new(30, Duration::from_millis(5));
        let start = Instant::now();
        let ran = (0..200)
            .filter(|i| t.ready(start + Duration::from_millis(5 * i)))
            .count();
        // One second of 5 ms ticks; steps land every 30 ms.
        assert!((30..=35).contains(&ran), "ran {ran} steps");
    }

    #[test]
    fn cadence_names() {
        let c: Cadence = serde_json::from_str("\"poll\"").unwrap();
        assert_eq!(c, Cadence::Poll);
        assert_eq!(serde_json::to_string(&Cadence::Push).unwrap(), "\"push\"");
    }
}
