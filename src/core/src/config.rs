//! Environment-based daemon configuration.
//!
//! All knobs come from the environment; `Config::from_env` validates the
//! required ones up front so a misconfigured daemon fails at startup
//! instead of at commit time.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{MagosError, Result};

/// Default poll interval when a target does not override it.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Default branch commits land on.
pub const DEFAULT_BRANCH: &str = "main";

/// GitHub App credentials for the host adaptor.
///
/// `installation_token` is a pre-provisioned installation token; minting
/// tokens from `private_key_path` is a planned follow-up, so the App
/// identifiers are carried here for that purpose.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// GitHub App ID (`GH_APP_ID`).
    pub app_id: Option<i64>,
    /// GitHub App installation ID (`GH_INSTALLATION_ID`).
    pub installation_id: Option<i64>,
    /// Path to the App private key PEM (`GH_PRIVATE_KEY_PATH`).
    pub private_key_path: Option<PathBuf>,
    /// Pre-provisioned installation token (`GH_INSTALLATION_TOKEN`).
    pub installation_token: Option<String>,
}

/// Daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// GitOps repository as `owner/name` (`MD_REPO`).
    pub repo: String,

    /// Default branch for direct pushes (`MD_BRANCH`).
    pub branch: String,

    /// Pin by digest on write (`MD_PREFER_DIGEST`).
    pub prefer_digest: bool,

    /// Open a pull request instead of pushing to the branch (`MD_PREFER_PR`).
    pub prefer_pr: bool,

    /// Path to the reconcile hook script (`MD_RECONCILE_SCRIPT`).
    pub reconcile_script: PathBuf,

    /// Directory holding `state.json` (`MD_STATE_DIR`).
    pub state_dir: PathBuf,

    /// Git host credentials.
    pub github: GitHubConfig,
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// `MD_REPO` is required; everything else has a default. Credential
    /// variables are validated when present (a malformed `GH_APP_ID` is a
    /// config error, an absent one is not).
    pub fn from_env() -> Result<Self> {
        let repo = match std::env::var("MD_REPO") {
            Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => {
                return Err(MagosError::ConfigError(
                    "MD_REPO is required (owner/name of the GitOps repository)".to_string(),
                ))
            }
        };

        let github = GitHubConfig {
            app_id: parse_id("GH_APP_ID")?,
            installation_id: parse_id("GH_INSTALLATION_ID")?,
            private_key_path: env_path("GH_PRIVATE_KEY_PATH"),
            installation_token: env_nonempty("GH_INSTALLATION_TOKEN"),
        };

        Ok(Config {
            repo,
            branch: env_nonempty("MD_BRANCH").unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
            prefer_digest: env_bool("MD_PREFER_DIGEST"),
            prefer_pr: env_bool("MD_PREFER_PR"),
            reconcile_script: env_path("MD_RECONCILE_SCRIPT")
                .unwrap_or_else(|| PathBuf::from("./reconcile.sh")),
            state_dir: env_path("MD_STATE_DIR").unwrap_or_else(default_state_dir),
            github,
        })
    }

    /// Path of the persisted observation state file.
    pub fn state_path(&self) -> PathBuf {
        self.state_dir.join("state.json")
    }

    /// Local working clone location (`<tmpdir>/git`).
    pub fn clone_path(&self) -> PathBuf {
        std::env::temp_dir().join("git")
    }
}

/// Default state directory: `<user data dir>/magos`, falling back to a
/// relative `tmp/magos` when no data dir is known.
fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("magos"))
        .unwrap_or_else(|| PathBuf::from("tmp/magos"))
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env_nonempty(key).map(PathBuf::from)
}

fn env_bool(key: &str) -> bool {
    matches!(
        env_nonempty(key).as_deref(),
        Some("true") | Some("1") | Some("yes")
    )
}

fn parse_id(key: &str) -> Result<Option<i64>> {
    match env_nonempty(key) {
        None => Ok(None),
        Some(v) => v
            .parse::<i64>()
            .map(Some)
            .map_err(|_| MagosError::ConfigError(format!("{key} must be an integer, got '{v}'"))),
    }
}
