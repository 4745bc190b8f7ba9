//! Tiered retention for timestamped backup artifacts.
//!
//! Given backup names like `backup_20230115-031500.sql.gz` and a count of
//! monthly, weekly and daily windows to preserve, decide which artifacts are
//! kept and which are removed. Everything here is pure: no I/O, no clock.
//! Callers list their storage, read "now" once, and act on the [`Decision`].
//!
//! - [`artifact`]: naming convention, [`ArtifactKind`] and timestamp extraction.
//! - [`interval`]: [`Granularity`] windows and per-window reservation.
//! - [`decide()`]: the union of all tiers, and everything else to remove.

pub mod artifact;
mod decide;
pub mod error;
pub mod interval;

pub use crate::artifact::{Artifact, ArtifactKind, artifact_name, extract_timestamp, format_timestamp};
pub use crate::decide::{Decision, Policy, RetentionCounts, decide, decide_remove, decide_with_policy};
pub use crate::interval::{Granularity, Window};
