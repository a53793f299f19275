//! Semantic version resolution over registry tag lists.

use magos_core::error::{MagosError, Result};
use semver::Version;

/// Pick the greatest semantic version from a tag list.
///
/// Accepts `MAJOR.MINOR.PATCH` spellings with an optional `v` prefix and
/// optional prerelease/build suffixes; everything else (`main`, `latest`,
/// date stamps) is ignored. Prereleases sort below the stable version of
/// the same core, and the winner keeps its original spelling, `v` prefix
/// included. The result does not depend on input order.
pub fn resolve(tags: &[String]) -> Result<String> {
    let mut candidates: Vec<(Version, &str)> = Vec::new();

    for tag in tags {
        let tag = tag.trim();
        if tag.is_empty() {
            continue;
        }
        let core = tag.strip_prefix('v').unwrap_or(tag);
        // Version::parse enforces the full MAJOR.MINOR.PATCH shape, so a
        // bare "v" prefix is the only leniency granted here.
        if let Ok(version) = Version::parse(core) {
            candidates.push((version, tag));
        }
    }

    // Tie-break equal versions on spelling so permutations of the input
    // cannot change the winner.
    candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
    match candidates.pop() {
        Some((_, tag)) => Ok(tag.to_string()),
        None => Err(MagosError::ResolveError(
            "no valid semver tags found in list".to_string(),
        )),
    }
}
