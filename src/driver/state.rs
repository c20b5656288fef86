use serde::{Deserialize, Serialize};

use crate::{animator::CounterKey, encode::EncoderExit};

/// Lifecycle of the delivery driver.
///
/// `Idle -> Starting -> Streaming -> Stopping -> Stopped`, with `Streaming -> Starting` when
/// the encoder exits under [`RestartPolicy::Restart`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DriverState {
    #[default]
    Idle,
    Starting,
    Streaming,
    Stopping,
    Stopped,
}

impl DriverState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_become(self, next: DriverState) -> bool {
        use DriverState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Streaming)
                | (Streaming, Starting)
                | (Idle | Starting | Streaming, Stopping)
                | (Stopping, Stopped)
        )
    }
}

/// What to do when the encoder exits while the driver is still running.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// Relaunch after the configured delay.
    #[default]
    Restart,
    /// Stop the driver and report the failure.
    FailFast,
}

/// Summary of one driver run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DriverReport {
    /// Frames accepted by the encoder queue, or still frames written in poll cadence.
    pub frames_delivered: u64,
    /// Frames discarded because the encoder queue was full.
    pub frames_dropped: u64,
    /// Successful relaunches after an unexpected encoder exit.
    pub restarts: u32,
    pub final_state: DriverState,
    /// Set when the run ended because the encoder exited under [`RestartPolicy::FailFast`].
    pub encoder_failure: Option<EncoderExit>,
    /// Counter values on screen when the run ended, in [`CounterKey::ALL`] order.
    pub displayed: [u64; CounterKey::COUNT],
}
