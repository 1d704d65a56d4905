//! # Kubernetes versions
//!
//! Versions come from discovery (`v1.29.3`), kubelets (`v1.29.3-eks-1`) and
//! the cluster configuration (`1.29`). Only the numeric triple matters for
//! ordering and the `major.minor` form is what gets published.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed kubernetes version {0:?}")]
pub struct VersionError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KubeVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl KubeVersion {
    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// `1.29`, the form stored in values and status
    #[must_use]
    pub fn major_minor(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }
}

/// First release where containerd is a supported runtime
pub const CONTAINERD_MIN_VERSION: KubeVersion = KubeVersion::new(1, 19, 0);

impl FromStr for KubeVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || VersionError(s.to_string());
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        // Drop pre-release and build metadata
        let core = trimmed
            .split(['-', '+'])
            .next()
            .filter(|c| !c.is_empty())
            .ok_or_else(malformed)?;

        let mut parts = core.split('.');
        let mut next_number = |required: bool| -> Result<u64, VersionError> {
            match parts.next() {
                Some(p) => p.parse::<u64>().map_err(|_| malformed()),
                None if required => Err(malformed()),
                None => Ok(0),
            }
        };
        let major = next_number(true)?;
        let minor = next_number(true)?;
        let patch = next_number(false)?;
        if parts.next().is_some() {
            return Err(malformed());
        }
        Ok(Self::new(major, minor, patch))
    }
}

impl fmt::Display for KubeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        assert_eq!("v1.29.3".parse(), Ok(KubeVersion::new(1, 29, 3)));
        assert_eq!("1.29".parse(), Ok(KubeVersion::new(1, 29, 0)));
        assert_eq!("v1.27.8-eks-8cb36c9".parse(), Ok(KubeVersion::new(1, 27, 8)));
        assert_eq!("1.30.1+k3s1".parse(), Ok(KubeVersion::new(1, 30, 1)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "v", "1", "Automatic", "1.x", "1.2.3.4", "-1.2"] {
            assert!(bad.parse::<KubeVersion>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_ordering_is_numeric() {
        let v1_9: KubeVersion = "1.9.0".parse().unwrap();
        let v1_19: KubeVersion = "1.19.0".parse().unwrap();
        assert!(v1_9 < v1_19);
        assert!(v1_19 >= CONTAINERD_MIN_VERSION);
        assert_eq!(v1_19.major_minor(), "1.19");
        assert_eq!(v1_19.to_string(), "1.19.0");
    }
}
