//! Backup artifact naming.
//!
//! Artifacts are identified purely by name. The prefix decides the
//! [`ArtifactKind`], and a `YYYYMMDD-HHMMSS` substring anywhere in the name
//! records when the artifact was created (naive local time):
//!
//! - `backup_20230115-031500.sql.gz` is a database dump.
//! - `dir_20230115-031500.tar.gz` is a media archive.
//! - `dir_20230115-031500` (a directory) is a media snapshot.

use crate::error::{ErrorKind, ParseError, Result};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use time::{Date, Month, PrimitiveDateTime, Time};

const DATABASE_PREFIX: &str = "backup_";
const MEDIA_PREFIX: &str = "dir_";

// Only ASCII digits count: `\d` would also accept other Unicode digits.
static TIMESTAMP_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]{4})([0-9]{2})([0-9]{2})-([0-9]{2})([0-9]{2})([0-9]{2})").unwrap());

/// What a backup artifact contains, decided by its name prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKind {
    /// Database dump (`backup_` prefix).
    Database,
    /// Media archive or snapshot (`dir_` prefix).
    Media,
    /// Not a backup artifact. Never enters retention processing.
    Unrecognized,
}
impl ArtifactKind {
    /// Classify a name by its prefix. No I/O, no timestamp check.
    #[must_use]
    pub fn classify(name: &str) -> Self {
        if name.starts_with(DATABASE_PREFIX) {
            Self::Database
        } else if name.starts_with(MEDIA_PREFIX) {
            Self::Media
        } else {
            Self::Unrecognized
        }
    }

    /// The name prefix used by this kind of artifact.
    #[must_use]
    pub fn prefix(&self) -> Option<&'static str> {
        match self {
            Self::Database => Some(DATABASE_PREFIX),
            Self::Media => Some(MEDIA_PREFIX),
            Self::Unrecognized => None,
        }
    }

    pub fn is_backup(&self) -> bool {
        !matches!(self, Self::Unrecognized)
    }
}
impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Database => "database",
            Self::Media => "media",
            Self::Unrecognized => "unrecognized",
        })
    }
}

/// Recover the creation time embedded in an artifact name.
///
/// The first `YYYYMMDD-HHMMSS` match wins, wherever it sits in the name.
///
/// # Errors
/// - [`ParseError::NoTimestampFound`] if nothing in the name looks like a timestamp.
/// - [`ParseError::InvalidTimestamp`] if the digits don't form a real date and
///   time (month 13, February 30th, hour 24, ...).
///
/// # Examples
///
/// ```
/// use keeper_policy::extract_timestamp;
/// use time::{Date, Month, PrimitiveDateTime, Time};
///
/// let created = extract_timestamp("backup_20230115-031500.sql.gz").unwrap();
/// assert_eq!(
///     created,
///     PrimitiveDateTime::new(
///         Date::from_calendar_date(2023, Month::January, 15).unwrap(),
///         Time::from_hms(3, 15, 0).unwrap(),
///     )
/// );
/// assert!(extract_timestamp("backup_invalid.sql").is_err());
/// ```
pub fn extract_timestamp(name: &str) -> Result<PrimitiveDateTime> {
    let Some(captures) = TIMESTAMP_REGEX.captures(name) else {
        exn::bail!(ErrorKind::from(ParseError::NoTimestampFound(name.to_string())));
    };
    let invalid = || ErrorKind::from(ParseError::InvalidTimestamp(name.to_string()));
    // Every group is a run of ASCII digits, at most four long; these parses can't overflow.
    let mut fields = [0u16; 6];
    for (field, group) in fields.iter_mut().zip(captures.iter().skip(1)) {
        *field = group.map(|m| m.as_str()).unwrap_or_default().parse().map_err(|_| invalid())?;
    }
    let [year, month, day, hour, minute, second] = fields;
    let month = u8::try_from(month).ok().and_then(|m| Month::try_from(m).ok()).ok_or_else(invalid)?;
    let date = Date::from_calendar_date(i32::from(year), month, u8::try_from(day).map_err(|_| invalid())?)
        .map_err(|_| invalid())?;
    let time = Time::from_hms(
        u8::try_from(hour).map_err(|_| invalid())?,
        u8::try_from(minute).map_err(|_| invalid())?,
        u8::try_from(second).map_err(|_| invalid())?,
    )
    .map_err(|_| invalid())?;
    Ok(PrimitiveDateTime::new(date, time))
}

/// Encode a creation time the way artifact names carry it (`YYYYMMDD-HHMMSS`).
#[must_use]
pub fn format_timestamp(timestamp: PrimitiveDateTime) -> String {
    format!(
        "{:04}{:02}{:02}-{:02}{:02}{:02}",
        timestamp.year(),
        u8::from(timestamp.month()),
        timestamp.day(),
        timestamp.hour(),
        timestamp.minute(),
        timestamp.second(),
    )
}

/// Build the name of a new artifact, e.g. `backup_20230115-031500.sql.gz`.
///
/// Returns `None` for [`ArtifactKind::Unrecognized`], which has no naming
/// convention.
#[must_use]
pub fn artifact_name(kind: ArtifactKind, created: PrimitiveDateTime, suffix: &str) -> Option<String> {
    Some(format!("{}{}{}", kind.prefix()?, format_timestamp(created), suffix))
}

/// A backup artifact name with its kind and creation time resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    name: String,
    kind: ArtifactKind,
    created: PrimitiveDateTime,
}
impl Artifact {
    /// Resolve an artifact name, failing if it carries no usable timestamp.
    pub fn parse(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let created = extract_timestamp(&name)?;
        Ok(Self {
            kind: ArtifactKind::classify(&name),
            name,
            created,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn created(&self) -> PrimitiveDateTime {
        self.created
    }
}
