use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::MetadataError;

/// An application version label, `<major>.<minor>`.
///
/// Ordering is by major, then minor. The canonical string form is always
/// two components, so `"3"` parses to the same value as `"3.0"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AppVersion {
    pub major: u64,
    pub minor: u64,
}

impl AppVersion {
    pub fn new(major: u64, minor: u64) -> Self {
        Self { major, minor }
    }

    /// Parse `input` and return its canonical form.
    pub fn canonicalize(input: &str) -> Result<String, MetadataError> {
        input.parse::<AppVersion>().map(|v| v.to_string())
    }
}

fn parse_component(component: &str, input: &str) -> Result<u64, MetadataError> {
    // `u64::from_str` accepts a leading '+', which is not a valid version.
    if component.is_empty() || !component.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MetadataError::InvalidVersion(input.to_string()));
    }
    component
        .parse::<u64>()
        .map_err(|_| MetadataError::InvalidVersion(input.to_string()))
}

impl FromStr for AppVersion {
    type Err = MetadataError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let (major, minor) = match trimmed.split_once('.') {
            Some((major, minor)) => (major, Some(minor)),
            None => (trimmed, None),
        };

        let major = parse_component(major, input)?;
        let minor = match minor {
            Some(minor) => parse_component(minor, input)?,
            None => 0,
        };
        Ok(AppVersion { major, minor })
    }
}

impl fmt::Display for AppVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl Ord for AppVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
    }
}

impl PartialOrd for AppVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
