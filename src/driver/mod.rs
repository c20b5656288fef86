//! Render cadence and encoder lifecycle.
//!
//! One [`DeliveryDriver`] loop owns the overlay state, the render timer, both fetch timers and
//! the encoder session; cancellation of its token stops all periodic work.

/// Push/poll cadence and the frame throttle.
pub mod cadence;
/// The driver loop.
pub mod scheduler;
/// Lifecycle states, restart policy and the run report.
pub mod state;

pub use cadence::{Cadence, FrameThrottle};
pub use scheduler::{DeliveryDriver, DriverOpts};
pub use state::{DriverReport, DriverState, RestartPolicy};
