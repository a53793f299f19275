//! Working-clone management and manifest rewrites.
//!
//! The rewrite is textual and byte-preserving: only the first line that
//! carries both the `image:` field and the `{"magos":` marker is touched,
//! the leading whitespace and the annotation tail stay verbatim, and the
//! file is replaced atomically (write `.tmp`, rename). Everything else in
//! the file is never reflowed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use magos_core::error::{MagosError, Result};
use magos_core::policy::Policy;

use crate::github::GitHost;

/// Marker an image line must carry to be rewritable (the annotation
/// marker without its trailing colon, matching lines with or without
/// whitespace after `"magos"`).
const REWRITE_MARKER: &str = "{\"magos\"";

/// Owns the local working clone and the commit path back to the host.
pub struct RepoManager {
    path: PathBuf,
    branch: String,
    host: Arc<dyn GitHost>,
}

impl RepoManager {
    pub fn new(path: impl Into<PathBuf>, branch: &str, host: Arc<dyn GitHost>) -> Self {
        Self {
            path: path.into(),
            branch: branch.to_string(),
            host,
        }
    }

    /// Root of the working clone.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sync the working clone with the remote default branch.
    pub async fn sync(&self) -> Result<()> {
        self.host.clone_or_pull(&self.path).await
    }

    /// Rewrite the annotated image line of `file` to the desired
    /// reference. Returns false when the file already matches (no bytes
    /// written) or no annotated line exists.
    pub fn update_image(
        &self,
        file: &Path,
        new_ref: &str,
        new_digest: &str,
        policy: Policy,
    ) -> Result<bool> {
        let src = std::fs::read_to_string(file)?;
        let mut lines: Vec<String> = src.split('\n').map(str::to_string).collect();

        let Some((idx, rewritten)) = find_and_rewrite(&lines, new_ref, new_digest, policy)? else {
            return Ok(false);
        };
        lines[idx] = rewritten;

        let mut tmp = file.as_os_str().to_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, lines.join("\n"))?;
        std::fs::rename(&tmp, file)?;
        Ok(true)
    }

    /// Commit the (already rewritten) file back through the host API.
    ///
    /// Direct pushes land on the default branch; `prefer_pr` commits to a
    /// fresh `magos/auto-<ts>` branch and opens a pull request.
    pub async fn commit_and_push(&self, abs_file: &Path, prefer_pr: bool) -> Result<()> {
        let rel = abs_file
            .strip_prefix(&self.path)
            .map_err(|_| {
                MagosError::Other(format!(
                    "{} is outside the working clone {}",
                    abs_file.display(),
                    self.path.display()
                ))
            })?
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let content = std::fs::read(abs_file)?;

        let branch = if prefer_pr {
            format!("magos/auto-{}", Utc::now().timestamp())
        } else {
            self.branch.clone()
        };
        let message = format!("magos: update {rel}");

        self.host
            .update_file(&rel, &branch, &message, &content)
            .await?;

        if prefer_pr {
            let url = self
                .host
                .open_pr(
                    &self.branch,
                    &branch,
                    &message,
                    "Automated update from magos-dominus.",
                )
                .await?;
            tracing::info!(pr = %url, "Opened pull request");
        }
        Ok(())
    }
}

/// Locate the first annotated image line and produce its rewritten form.
/// `None` when no line matches or the line already carries the desired
/// reference.
fn find_and_rewrite(
    lines: &[String],
    new_ref: &str,
    new_digest: &str,
    policy: Policy,
) -> Result<Option<(usize, String)>> {
    for (i, line) in lines.iter().enumerate() {
        if !line.contains("image:") || !line.contains(REWRITE_MARKER) {
            continue;
        }
        let Some((left, right)) = line.split_once('#') else {
            continue;
        };

        let img_field = left.trim_end_matches([' ', '\t']);
        let Some(idx) = img_field.find("image:") else {
            continue;
        };
        let prefix = &img_field[..idx];
        let current = img_field[idx + "image:".len()..].trim();
        if current.is_empty() {
            continue;
        }

        let base = strip_ref_or_digest(current);
        let desired = match policy {
            Policy::Digest => {
                if !new_digest.starts_with("sha256:") {
                    return Err(MagosError::InvalidDigestError(new_digest.to_string()));
                }
                format!("{base}@{new_digest}")
            }
            _ => {
                if new_ref.is_empty() {
                    return Err(MagosError::EmptyRefError);
                }
                format!("{base}:{new_ref}")
            }
        };

        if normalize_image(current) == normalize_image(&desired) {
            return Ok(None);
        }

        return Ok(Some((i, format!("{prefix}image: {desired} #{right}"))));
    }
    Ok(None)
}

/// `registry/owner/name` from `registry/owner/name:tag` or
/// `registry/owner/name@sha256:...`. Digests contain `:`, so only the
/// last colon counts as a tag delimiter and only when nothing after it
/// contains `/`.
fn strip_ref_or_digest(image: &str) -> &str {
    let image = image.trim();
    if let Some(at) = image.find('@') {
        return &image[..at];
    }
    if let Some(c) = image.rfind(':') {
        if c > 0 && !image[c + 1..].contains('/') {
            return &image[..c];
        }
    }
    image
}

/// Equality helper: lowercase the repository part, leave tag/digest as-is.
fn normalize_image(image: &str) -> String {
    let image = image.trim();
    if image.is_empty() {
        return String::new();
    }
    if let Some(at) = image.find('@') {
        return format!("{}{}", image[..at].to_lowercase(), &image[at..]);
    }
    if let Some(c) = image.rfind(':') {
        if c > 0 && !image[c + 1..].contains('/') {
            return format!("{}{}", image[..c].to_lowercase(), &image[c..]);
        }
    }
    image.to_lowercase()
}
