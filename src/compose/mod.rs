//! Overlay frame composition.
//!
//! A [`FrameComposer`] turns an [`OverlayState`](crate::overlay::OverlayState) into one
//! premultiplied RGBA8 frame on the CPU.

/// Frame assembly and the LIVE badge pulse.
pub mod frame;
/// Counter abbreviation for card values.
pub mod format;
/// Card row, header and badge geometry.
pub mod layout;
pub(crate) mod paint;
/// Font loading and single-line shaping.
pub mod text;

pub use format::format_count;
pub use frame::FrameComposer;
pub use layout::OverlayLayout;
pub use text::{TextLayoutEngine, load_font_bytes};
