//! Semantic plugin versions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A `major.minor.patch` version. Compatibility is decided on major alone;
/// minor and patch are informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PluginVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl PluginVersion {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Whether this version is compatible with a host interface major.
    pub fn compatible_with(&self, required_major: u64) -> bool {
        self.major == required_major
    }
}

impl fmt::Display for PluginVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for PluginVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let mut next = |what: &str| -> Result<u64, String> {
            parts
                .next()
                .ok_or_else(|| format!("missing {what} in '{s}'"))?
                .parse()
                .map_err(|_| format!("invalid {what} in '{s}'"))
        };
        let major = next("major")?;
        let minor = next("minor")?;
        let patch = next("patch")?;
        if parts.next().is_some() {
            return Err(format!("too many components in '{s}'"));
        }
        Ok(Self {
            major,
            minor,
            patch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let v: PluginVersion = "1.4.2".parse().unwrap();
        assert_eq!(v, PluginVersion::new(1, 4, 2));
        assert_eq!(v.to_string(), "1.4.2");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("1.4".parse::<PluginVersion>().is_err());
        assert!("1.4.2.9".parse::<PluginVersion>().is_err());
        assert!("one.two.three".parse::<PluginVersion>().is_err());
        assert!("".parse::<PluginVersion>().is_err());
    }

    #[test]
    fn test_compatibility_is_major_only() {
        let v = PluginVersion::new(1, 9, 9);
        assert!(v.compatible_with(1));
        assert!(!v.compatible_with(2));
        assert!(!PluginVersion::new(2, 0, 0).compatible_with(1));
    }

    #[test]
    fn test_ordering() {
        let a = PluginVersion::new(1, 2, 3);
        let b = PluginVersion::new(1, 10, 0);
        assert!(a < b);
    }
}
