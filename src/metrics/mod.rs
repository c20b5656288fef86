//! Channel and live-stream statistics retrieval.
//!
//! The fetcher never propagates errors: each attempt ends in a [`FetchOutcome`] that is folded
//! into the overlay state according to the refresh failure policy.

/// Counter API document decoding.
pub mod document;
/// Refresh attempts with timeouts and the failure policy.
pub mod fetcher;
/// The HTTP collaborator.
pub mod source;

pub use document::{ChannelStats, StreamStats, collapse_pairs};
pub use fetcher::{FetchKind, FetchOutcome, MetricsFetcher};
pub use source::{HttpEndpoints, HttpMetricsSource, MetricsSource};
