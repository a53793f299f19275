//! Manifest annotation discovery.
//!
//! Walks a working tree and extracts watched image lines. The scan is
//! purely textual: a YAML parser would reflow whitespace and destroy the
//! comments the annotations live in, so files are only ever inspected
//! line by line and rewritten byte-preservingly elsewhere.

use std::path::{Path, PathBuf};

use magos_core::error::Result;
use magos_core::policy::Policy;
use serde::Deserialize;
use walkdir::WalkDir;

/// Line marker that opts an image line into watching.
pub const ANNOTATION_MARKER: &str = "{\"magos\":";

/// A discovered `image:` line carrying a magos annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    /// Absolute path of the manifest file.
    pub file: PathBuf,
    /// 1-based line number of the image line.
    pub line: usize,
    /// Raw image reference as written (`registry/owner/name[:tag|@digest]`).
    pub image: String,
    /// Update policy; absent or unparseable policy fields mean `manual`.
    pub policy: Policy,
}

#[derive(Deserialize)]
struct AnnotationBlob {
    magos: MagosFields,
}

#[derive(Deserialize)]
struct MagosFields {
    #[serde(default)]
    policy: String,
    // Other keys ("note", "repo", ...) are tolerated and ignored.
}

/// Scan a working tree for annotated image lines.
///
/// Only `.yml`/`.yaml` files are considered. Lines must carry both the
/// `image:` field and the annotation marker; annotations with malformed
/// JSON are dropped silently so one broken comment cannot take the whole
/// repository out of watch.
pub fn scan_annotations(root: &Path) -> Result<Vec<Annotation>> {
    let mut out = Vec::new();

    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| {
            std::io::Error::other(format!("walk {}: {e}", root.display()))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let ext = entry
            .path()
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase());
        if !matches!(ext.as_deref(), Some("yml") | Some("yaml")) {
            continue;
        }

        let content = std::fs::read_to_string(entry.path())?;
        for (idx, line) in content.lines().enumerate() {
            if let Some((image, policy)) = parse_line(line) {
                out.push(Annotation {
                    file: entry.path().to_path_buf(),
                    line: idx + 1,
                    image,
                    policy,
                });
            }
        }
    }

    Ok(out)
}

/// Parse one line into `(image, policy)`; `None` for unannotated lines.
fn parse_line(line: &str) -> Option<(String, Policy)> {
    if !line.contains("image:") || !line.contains(ANNOTATION_MARKER) {
        return None;
    }
    let (left, right) = line.split_once('#')?;

    let image = left
        .find("image:")
        .map(|idx| left[idx + "image:".len()..].trim())?;
    if image.is_empty() {
        return None;
    }

    let raw = right.trim();
    let json = &raw[raw.find('{')?..];
    let blob: AnnotationBlob = serde_json::from_str(json).ok()?;

    Some((image.to_string(), Policy::parse_lenient(&blob.magos.policy)))
}
