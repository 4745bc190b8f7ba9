//! Interval bucketing.
//!
//! Each [`Granularity`] walks backwards from "now" in fixed-width steps,
//! producing contiguous, non-overlapping [`Window`]s. Only the first window
//! is anchored to the calendar; every later one is the previous shifted back
//! by one step. A "month" past the first is just 30 days.
//!
//! | Granularity | Step    | First window ends at               |
//! |-------------|---------|------------------------------------|
//! | monthly     | 30 days | first day of the current month     |
//! | weekly      | 7 days  | Monday of the current week         |
//! | daily       | 1 day   | tomorrow                           |
//!
//! All boundaries fall on midnight.

use crate::artifact::Artifact;
use std::fmt;
use time::{Duration, PrimitiveDateTime};

/// A retention tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Granularity {
    Monthly,
    Weekly,
    Daily,
}
impl Granularity {
    /// Every tier, in the order the decider applies them.
    pub const ALL: [Granularity; 3] = [Granularity::Monthly, Granularity::Weekly, Granularity::Daily];

    /// Width of every window of this tier.
    #[must_use]
    pub fn step(&self) -> Duration {
        match self {
            Self::Monthly => Duration::days(30),
            Self::Weekly => Duration::days(7),
            Self::Daily => Duration::days(1),
        }
    }

    /// The most recent window of this tier, relative to `now`.
    ///
    /// Returns `None` only at the edges of the representable date range.
    #[must_use]
    pub fn first_window(&self, now: PrimitiveDateTime) -> Option<Window> {
        let today = now.date();
        let end = match self {
            Self::Monthly => today.replace_day(1).ok()?,
            Self::Weekly => today.checked_sub(Duration::days(i64::from(today.weekday().number_days_from_monday())))?,
            Self::Daily => today.next_day()?,
        }
        .midnight();
        Some(Window {
            start: end.checked_sub(self.step())?,
            end,
        })
    }

    /// The `count` most recent windows of this tier, newest first.
    ///
    /// # Examples
    ///
    /// ```
    /// use keeper_policy::Granularity;
    /// use time::macros::datetime;
    ///
    /// let mut windows = Granularity::Daily.windows(datetime!(2023-02-01 13:00), 2);
    /// let today = windows.next().unwrap();
    /// assert_eq!((today.start(), today.end()), (datetime!(2023-02-01 00:00), datetime!(2023-02-02 00:00)));
    /// let yesterday = windows.next().unwrap();
    /// assert_eq!(yesterday.end(), today.start());
    /// assert!(windows.next().is_none());
    /// ```
    pub fn windows(&self, now: PrimitiveDateTime, count: u32) -> Windows {
        Windows {
            next: self.first_window(now),
            step: self.step(),
            remaining: count,
        }
    }
}
impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Monthly => "monthly",
            Self::Weekly => "weekly",
            Self::Daily => "daily",
        })
    }
}

/// A half-open time range `(start, end]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    start: PrimitiveDateTime,
    end: PrimitiveDateTime,
}
impl Window {
    pub fn start(&self) -> PrimitiveDateTime {
        self.start
    }

    pub fn end(&self) -> PrimitiveDateTime {
        self.end
    }

    /// `start < timestamp <= end`
    #[must_use]
    pub fn contains(&self, timestamp: PrimitiveDateTime) -> bool {
        self.start < timestamp && timestamp <= self.end
    }

    fn shifted_back(&self, step: Duration) -> Option<Self> {
        Some(Self {
            start: self.start.checked_sub(step)?,
            end: self.end.checked_sub(step)?,
        })
    }
}

/// Iterator over the windows of one tier, see [`Granularity::windows`].
#[derive(Clone, Debug)]
pub struct Windows {
    next: Option<Window>,
    step: Duration,
    remaining: u32,
}
impl Iterator for Windows {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        if self.remaining == 0 {
            return None;
        }
        let current = self.next.take()?;
        self.remaining -= 1;
        self.next = current.shifted_back(self.step);
        Some(current)
    }
}

/// Pick at most one artifact per window for the `count` most recent windows
/// of `granularity`.
///
/// Within a window, the *first* artifact in `artifacts` order wins (not the
/// newest): callers pass artifacts sorted ascending by name. Empty windows
/// reserve nothing, so fewer than `count` names may come back.
pub fn reserve<'a>(
    artifacts: &'a [Artifact],
    granularity: Granularity,
    count: u32,
    now: PrimitiveDateTime,
) -> Vec<&'a str> {
    let Some(oldest) = artifacts.iter().map(Artifact::created).min() else {
        return Vec::new();
    };
    let mut reserved = Vec::new();
    for window in granularity.windows(now, count) {
        // Windows only get older from here; nothing left to find.
        if window.end < oldest {
            break;
        }
        if let Some(artifact) = artifacts.iter().find(|a| window.contains(a.created())) {
            tracing::trace!(%granularity, start = %window.start, end = %window.end, artifact = artifact.name(), "Reserved artifact");
            reserved.push(artifact.name());
        }
    }
    reserved
}
