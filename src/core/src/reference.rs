//! Image reference parsing.
//!
//! Parses references like `ghcr.io/magos/app:v0.1.0` into structured
//! components. References carry exactly three slash segments
//! (`registry/owner/name`); registry, owner and name are compared
//! case-insensitively, the tag preserves case.

use serde::{Deserialize, Serialize};

use crate::error::{MagosError, Result};

/// Default tag when none is specified.
const DEFAULT_TAG: &str = "latest";

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Registry hostname (e.g., "ghcr.io")
    pub registry: String,
    /// Repository owner (e.g., "magos")
    pub owner: String,
    /// Repository name (e.g., "app")
    pub name: String,
    /// Tag (e.g., "latest", "v0.1.0")
    pub tag: String,
}

impl ImageRef {
    /// Parse an image reference string.
    ///
    /// Supports:
    /// - `ghcr.io/org/image` → tag defaults to `latest`
    /// - `ghcr.io/org/image:tag`
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(MagosError::ImageRefError("empty reference".to_string()));
        }

        let mut parts = reference.splitn(3, '/');
        let (registry, owner, rest) = match (parts.next(), parts.next(), parts.next()) {
            (Some(r), Some(o), Some(rest)) if !r.is_empty() && !o.is_empty() && !rest.is_empty() => {
                (r, o, rest)
            }
            _ => {
                return Err(MagosError::ImageRefError(format!(
                    "expected registry/owner/name, got '{reference}'"
                )))
            }
        };

        // Digest-pinned references keep the whole `sha256:...` suffix as
        // the ref; a HEAD on a digest is legal and resolves to itself.
        let (name, tag) = if let Some((n, d)) = rest.split_once('@') {
            (n, d)
        } else if let Some((n, t)) = rest.split_once(':') {
            (n, if t.is_empty() { DEFAULT_TAG } else { t })
        } else {
            (rest, DEFAULT_TAG)
        };
        if name.is_empty() || tag.is_empty() {
            return Err(MagosError::ImageRefError(format!(
                "empty repository name in '{reference}'"
            )));
        }

        Ok(ImageRef {
            registry: registry.to_string(),
            owner: owner.to_string(),
            name: name.to_string(),
            tag: tag.to_string(),
        })
    }

    /// Repository path as the registry sees it (`owner/name`).
    pub fn repo(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Get the full reference string (digest refs join with `@`).
    pub fn full_reference(&self) -> String {
        let sep = if self.tag.starts_with("sha256:") { '@' } else { ':' };
        format!(
            "{}/{}/{}{}{}",
            self.registry, self.owner, self.name, sep, self.tag
        )
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_reference() {
        let r = ImageRef::parse("ghcr.io/magos/app:v0.1.0").unwrap();
        assert_eq!(r.registry, "ghcr.io");
        assert_eq!(r.owner, "magos");
        assert_eq!(r.name, "app");
        assert_eq!(r.tag, "v0.1.0");
    }

    #[test]
    fn test_parse_defaults_tag_to_latest() {
        let r = ImageRef::parse("ghcr.io/magos/app").unwrap();
        assert_eq!(r.tag, "latest");
    }

    #[test]
    fn test_parse_preserves_tag_case() {
        let r = ImageRef::parse("ghcr.io/Magos/App:RC1").unwrap();
        assert_eq!(r.owner, "Magos");
        assert_eq!(r.tag, "RC1");
    }

    #[test]
    fn test_parse_rejects_short_references() {
        assert!(ImageRef::parse("app").is_err());
        assert!(ImageRef::parse("magos/app").is_err());
        assert!(ImageRef::parse("").is_err());
        assert!(ImageRef::parse("  ").is_err());
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let r = ImageRef::parse("  ghcr.io/magos/app:1.2.3  ").unwrap();
        assert_eq!(r.name, "app");
        assert_eq!(r.tag, "1.2.3");
    }

    #[test]
    fn test_repo() {
        let r = ImageRef::parse("ghcr.io/magos/app:1.0.0").unwrap();
        assert_eq!(r.repo(), "magos/app");
    }

    #[test]
    fn test_roundtrip() {
        for s in ["ghcr.io/o/n:latest", "ghcr.io/o/n:v1.2.3", "ghcr.io/O/N:Tag"] {
            let r = ImageRef::parse(s).unwrap();
            assert_eq!(r.full_reference(), s);
            let again = ImageRef::parse(&r.full_reference()).unwrap();
            assert_eq!(again, r);
        }
    }

    #[test]
    fn test_parse_digest_pinned_reference() {
        let r = ImageRef::parse("ghcr.io/magos/app@sha256:deadbeef").unwrap();
        assert_eq!(r.name, "app");
        assert_eq!(r.tag, "sha256:deadbeef");
        assert_eq!(r.full_reference(), "ghcr.io/magos/app@sha256:deadbeef");
    }

    #[test]
    fn test_display() {
        let r = ImageRef::parse("ghcr.io/magos/app").unwrap();
        assert_eq!(format!("{}", r), "ghcr.io/magos/app:latest");
    }

    #[test]
    fn test_parse_deep_name_keeps_extra_segments_in_name() {
        // GHCR-style repos are exactly owner/name; a deeper path keeps the
        // remainder in the name segment before the tag split.
        let r = ImageRef::parse("ghcr.io/org/sub/image:v1").unwrap();
        assert_eq!(r.owner, "org");
        assert_eq!(r.name, "sub/image");
        assert_eq!(r.tag, "v1");
    }
}
