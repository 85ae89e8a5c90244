//! Search engine version values carried in resource labels

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A `major.minor.patch[-label]` version
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub label: Option<String>,
}

impl Version {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            label: None,
        }
    }

    pub fn is_same_or_after(&self, other: &Version) -> bool {
        (self.major, self.minor, self.patch) >= (other.major, other.minor, other.patch)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim().trim_start_matches('v');
        let (numbers, label) = match raw.split_once('-') {
            Some((numbers, label)) if !label.is_empty() => (numbers, Some(label.to_string())),
            Some(_) => return Err(Error::ParseError(format!("invalid version: {s}"))),
            None => (raw, None),
        };

        let parts: Vec<&str> = numbers.split('.').collect();
        if parts.len() != 3 {
            return Err(Error::ParseError(format!(
                "version {s} must have the form major.minor.patch"
            )));
        }

        let parse = |part: &str| {
            part.parse::<u32>()
                .map_err(|e| Error::ParseError(format!("invalid version {s}: {e}")))
        };

        Ok(Version {
            major: parse(parts[0])?,
            minor: parse(parts[1])?,
            patch: parse(parts[2])?,
            label,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(label) = &self.label {
            write!(f, "-{label}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_version() {
        let v: Version = "7.1.0".parse().unwrap();
        assert_eq!(v, Version::new(7, 1, 0));
        assert_eq!(v.to_string(), "7.1.0");
    }

    #[test]
    fn test_parse_prefixed_and_labelled() {
        let v: Version = "v8.0.0-rc1".parse().unwrap();
        assert_eq!(v.major, 8);
        assert_eq!(v.label.as_deref(), Some("rc1"));
        assert_eq!(v.to_string(), "8.0.0-rc1");
    }

    #[test]
    fn test_reject_malformed() {
        assert!("7.1".parse::<Version>().is_err());
        assert!("7.x.0".parse::<Version>().is_err());
        assert!("".parse::<Version>().is_err());
        assert!("7.1.0-".parse::<Version>().is_err());
    }

    #[test]
    fn test_is_same_or_after() {
        let v7 = Version::new(7, 1, 0);
        assert!(v7.is_same_or_after(&Version::new(7, 0, 5)));
        assert!(v7.is_same_or_after(&Version::new(7, 1, 0)));
        assert!(!v7.is_same_or_after(&Version::new(7, 2, 0)));
    }
}
