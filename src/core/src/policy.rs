//! Update policies attached to watched image lines.

use serde::{Deserialize, Serialize};

/// How a watched image reference is allowed to advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    /// Track the greatest semantic version tag.
    Semver,
    /// Track the digest behind the declared tag (usually `latest`).
    Latest,
    /// Pin the manifest digest on write.
    Digest,
    /// Never update automatically (default).
    #[default]
    Manual,
}

impl Policy {
    /// String form used in annotations, state entries and hook arguments.
    pub fn as_str(&self) -> &'static str {
        match self {
            Policy::Semver => "semver",
            Policy::Latest => "latest",
            Policy::Digest => "digest",
            Policy::Manual => "manual",
        }
    }

    /// Parse an annotation policy field. Empty or unknown values fall
    /// back to `Manual`, which produces no watch target.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim() {
            "semver" => Policy::Semver,
            "latest" => Policy::Latest,
            "digest" => Policy::Digest,
            _ => Policy::Manual,
        }
    }
}

impl std::fmt::Display for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Policy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "semver" => Ok(Policy::Semver),
            "latest" => Ok(Policy::Latest),
            "digest" => Ok(Policy::Digest),
            "manual" => Ok(Policy::Manual),
            _ => Err(format!(
                "unknown policy: '{s}' (supported: semver, latest, digest, manual)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_from_str() {
        assert_eq!("semver".parse::<Policy>().unwrap(), Policy::Semver);
        assert_eq!("latest".parse::<Policy>().unwrap(), Policy::Latest);
        assert_eq!("digest".parse::<Policy>().unwrap(), Policy::Digest);
        assert_eq!("manual".parse::<Policy>().unwrap(), Policy::Manual);
        assert!("rolling".parse::<Policy>().is_err());
    }

    #[test]
    fn test_policy_lenient_defaults_to_manual() {
        assert_eq!(Policy::parse_lenient(""), Policy::Manual);
        assert_eq!(Policy::parse_lenient("  "), Policy::Manual);
        assert_eq!(Policy::parse_lenient("rolling"), Policy::Manual);
        assert_eq!(Policy::parse_lenient("semver"), Policy::Semver);
    }

    #[test]
    fn test_policy_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Policy::Semver).unwrap(), "\"semver\"");
        let p: Policy = serde_json::from_str("\"digest\"").unwrap();
        assert_eq!(p, Policy::Digest);
    }

    #[test]
    fn test_policy_display_roundtrip() {
        for p in [Policy::Semver, Policy::Latest, Policy::Digest, Policy::Manual] {
            assert_eq!(p.to_string().parse::<Policy>().unwrap(), p);
        }
    }
}
