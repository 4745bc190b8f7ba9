//! Retention decisions.
//!
//! The retain set is the union of what each [`Granularity`] reserves; every
//! other artifact is removed. Both lists keep the relative order of the input.

use crate::artifact::Artifact;
use crate::error::{ConfigurationError, ErrorKind, Result};
use crate::interval::{Granularity, reserve};
use exn::OptionExt;
use std::collections::HashSet;
use time::PrimitiveDateTime;
use tracing::instrument;

/// Retention counts as configured, before validation.
///
/// Each count is optional so that an incomplete configuration can be
/// reported instead of silently defaulting to "keep nothing".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(deny_unknown_fields))]
pub struct RetentionCounts {
    pub monthly: Option<u32>,
    pub weekly: Option<u32>,
    pub daily: Option<u32>,
}
impl RetentionCounts {
    pub fn new(monthly: u32, weekly: u32, daily: u32) -> Self {
        Self {
            monthly: Some(monthly),
            weekly: Some(weekly),
            daily: Some(daily),
        }
    }

    pub fn get(&self, granularity: Granularity) -> Option<u32> {
        match granularity {
            Granularity::Monthly => self.monthly,
            Granularity::Weekly => self.weekly,
            Granularity::Daily => self.daily,
        }
    }
}

/// A complete retention policy: how many of the most recent windows of each
/// tier keep an artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Policy {
    monthly: u32,
    weekly: u32,
    daily: u32,
}
impl Policy {
    pub fn new(monthly: u32, weekly: u32, daily: u32) -> Self {
        Self { monthly, weekly, daily }
    }

    pub fn count(&self, granularity: Granularity) -> u32 {
        match granularity {
            Granularity::Monthly => self.monthly,
            Granularity::Weekly => self.weekly,
            Granularity::Daily => self.daily,
        }
    }
}
impl TryFrom<&RetentionCounts> for Policy {
    type Error = crate::error::Error;

    /// Fails with [`ConfigurationError::MissingKey`] naming the first
    /// missing tier (monthly, then weekly, then daily).
    fn try_from(counts: &RetentionCounts) -> Result<Self> {
        let require = |granularity: Granularity| -> Result<u32> {
            counts
                .get(granularity)
                .ok_or_raise(|| ErrorKind::from(ConfigurationError::MissingKey(granularity)))
        };
        Ok(Self {
            monthly: require(Granularity::Monthly)?,
            weekly: require(Granularity::Weekly)?,
            daily: require(Granularity::Daily)?,
        })
    }
}
impl From<Policy> for RetentionCounts {
    fn from(policy: Policy) -> Self {
        Self::new(policy.monthly, policy.weekly, policy.daily)
    }
}

/// The outcome of applying a [`Policy`] to a set of artifacts.
///
/// `keep` and `remove` partition the input and each preserves its order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Decision {
    pub keep: Vec<String>,
    pub remove: Vec<String>,
}

/// Decide which artifacts to keep and which to remove.
///
/// `artifacts` must all be of one [`ArtifactKind`](crate::ArtifactKind) and
/// sorted ascending; within each window the first artifact in this order is
/// the one kept. `now` anchors every window, read it once per run.
///
/// # Errors
/// - [`ConfigurationError::MissingKey`] if `counts` is incomplete. Checked
///   before anything else.
/// - [`ParseError`](crate::error::ParseError) for the first artifact whose
///   timestamp can't be extracted. No partial decision is returned.
///
/// # Examples
///
/// ```
/// use keeper_policy::{RetentionCounts, decide};
/// use time::macros::datetime;
///
/// let decision = decide(
///     &["backup_20230130-010000.sql", "backup_20230131-010000.sql", "backup_20230131-020000.sql"],
///     &RetentionCounts::new(0, 0, 2),
///     datetime!(2023-01-31 12:00),
/// )
/// .unwrap();
/// assert_eq!(decision.keep, ["backup_20230130-010000.sql", "backup_20230131-010000.sql"]);
/// assert_eq!(decision.remove, ["backup_20230131-020000.sql"]);
/// ```
#[instrument(level = "debug", skip(artifacts), fields(artifact_count = artifacts.len()))]
pub fn decide<S: AsRef<str>>(artifacts: &[S], counts: &RetentionCounts, now: PrimitiveDateTime) -> Result<Decision> {
    let policy = Policy::try_from(counts)?;
    decide_with_policy(artifacts, &policy, now)
}

/// Like [`decide`] for an already validated [`Policy`].
pub fn decide_with_policy<S: AsRef<str>>(
    artifacts: &[S],
    policy: &Policy,
    now: PrimitiveDateTime,
) -> Result<Decision> {
    let parsed = artifacts.iter().map(|name| Artifact::parse(name.as_ref())).collect::<Result<Vec<_>>>()?;

    let retain: HashSet<&str> = Granularity::ALL
        .into_iter()
        .flat_map(|granularity| reserve(&parsed, granularity, policy.count(granularity), now))
        .collect();

    let (keep, remove): (Vec<_>, Vec<_>) =
        parsed.iter().map(Artifact::name).partition(|name| retain.contains(name));
    tracing::debug!(keep = keep.len(), remove = remove.len(), "Retention decided");
    Ok(Decision {
        keep: keep.into_iter().map(String::from).collect(),
        remove: remove.into_iter().map(String::from).collect(),
    })
}

/// The artifacts to delete under `counts`, in input order.
///
/// See [`decide`] for preconditions and errors.
pub fn decide_remove<S: AsRef<str>>(
    artifacts: &[S],
    counts: &RetentionCounts,
    now: PrimitiveDateTime,
) -> Result<Vec<String>> {
    Ok(decide(artifacts, counts, now)?.remove)
}
