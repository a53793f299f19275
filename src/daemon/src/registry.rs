//! OCI Distribution v2 registry client.
//!
//! Speaks to a single registry host (GHCR by default): anonymous bearer
//! token acquisition with a per-repository cache, manifest HEAD with
//! conditional-request support, and tag listing. Tag listing is unpaged;
//! the `n=` + `last=` cursor is the extension point if repositories ever
//! outgrow the registry's single-page limit.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use magos_core::error::{MagosError, Result};
use magos_core::policy::Policy;
use serde::Deserialize;

use crate::semver;

/// Default registry endpoint.
pub const DEFAULT_REGISTRY_URL: &str = "https://ghcr.io";

/// Per-request timeout, matching the original client.
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Manifest media types accepted on HEAD.
const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.oci.image.index.v1+json, \
     application/vnd.oci.image.manifest.v1+json";

/// Outcome of a manifest HEAD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadResult {
    /// Manifest digest; empty on 304 Not Modified.
    pub digest: String,
    /// The reference the digest was resolved under (semver policy may
    /// rewrite the declared tag).
    pub resolved_ref: String,
    /// Validator to send as `If-None-Match` on the next poll.
    pub etag: String,
    /// True when the registry answered 304.
    pub not_modified: bool,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: String,
}

#[derive(Deserialize)]
struct TagList {
    #[serde(default)]
    #[allow(dead_code)]
    name: String,
    #[serde(default)]
    tags: Vec<String>,
}

/// HTTP client for one OCI Distribution v2 endpoint.
pub struct RegistryClient {
    http: reqwest::Client,
    base_url: String,
    // repo -> cached anonymous pull token
    tokens: Mutex<HashMap<String, String>>,
}

impl RegistryClient {
    /// Create a client against `base_url` (e.g. `https://ghcr.io`).
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| MagosError::HttpError(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens: Mutex::new(HashMap::new()),
        })
    }

    /// Client against the default GHCR endpoint.
    pub fn ghcr() -> Result<Self> {
        Self::new(DEFAULT_REGISTRY_URL)
    }

    /// Resolve a reference to its manifest digest.
    ///
    /// For `semver` policy the candidate reference is resolved from the
    /// live tag list first; other policies HEAD the declared reference
    /// verbatim. A non-empty `if_none_match` turns the request into a
    /// conditional one, and a 304 answer reports `not_modified` without
    /// a digest.
    pub async fn head_digest(
        &self,
        repo: &str,
        reference: &str,
        if_none_match: &str,
        policy: Policy,
    ) -> Result<HeadResult> {
        let repo = repo.to_lowercase();

        // Policy stage: pick the candidate ref.
        let candidate = if policy == Policy::Semver {
            let tags = self.list_tags(&repo).await?;
            semver::resolve(&tags)?
        } else {
            reference.to_string()
        };

        // Registry stage: fetch manifest headers for the candidate.
        let token = self.acquire_token(&repo).await?;
        let url = format!("{}/v2/{}/manifests/{}", self.base_url, repo, candidate);
        let mut req = self
            .http
            .head(&url)
            .bearer_auth(&token)
            .header(reqwest::header::ACCEPT, MANIFEST_ACCEPT);
        if !if_none_match.is_empty() {
            req = req.header(reqwest::header::IF_NONE_MATCH, if_none_match);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| MagosError::HttpError(e.to_string()))?;

        match resp.status().as_u16() {
            304 => Ok(HeadResult {
                digest: String::new(),
                resolved_ref: candidate,
                etag: if_none_match.to_string(),
                not_modified: true,
            }),
            200 => {
                let digest = header(&resp, "Docker-Content-Digest");
                let etag = header(&resp, "ETag");
                if digest.is_empty() && etag.is_empty() {
                    return Err(MagosError::ProtocolError { status: 200 });
                }
                Ok(HeadResult {
                    digest,
                    resolved_ref: candidate,
                    etag,
                    not_modified: false,
                })
            }
            401 => {
                // Likely an expired token; drop it so the next tick
                // re-acquires before the caller's backoff expires.
                self.evict_token(&repo);
                Err(MagosError::AuthError { repo })
            }
            404 => Err(MagosError::NotFoundError(format!("{repo}:{candidate}"))),
            status => Err(MagosError::ProtocolError { status }),
        }
    }

    /// List all tags of a repository.
    pub async fn list_tags(&self, repo: &str) -> Result<Vec<String>> {
        let repo = repo.to_lowercase();
        let token = self.acquire_token(&repo).await?;
        let url = format!("{}/v2/{}/tags/list", self.base_url, repo);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| MagosError::HttpError(e.to_string()))?;

        let status = resp.status().as_u16();
        if status == 401 {
            self.evict_token(&repo);
            return Err(MagosError::AuthError { repo });
        }
        if status != 200 {
            return Err(MagosError::ProtocolError { status });
        }
        let list: TagList = resp
            .json()
            .await
            .map_err(|e| MagosError::HttpError(e.to_string()))?;
        Ok(list.tags)
    }

    /// Acquire an anonymous pull token for a repository, caching it until
    /// the registry rejects it.
    pub async fn acquire_token(&self, repo: &str) -> Result<String> {
        if let Some(token) = self.tokens.lock().unwrap().get(repo) {
            return Ok(token.clone());
        }

        let url = format!(
            "{}/token?scope=repository:{}:pull",
            self.base_url, repo
        );
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| MagosError::HttpError(e.to_string()))?;

        let status = resp.status().as_u16();
        if status != 200 {
            return Err(MagosError::TokenError { status });
        }
        let payload: TokenResponse = resp
            .json()
            .await
            .map_err(|e| MagosError::HttpError(e.to_string()))?;
        if payload.token.is_empty() {
            return Err(MagosError::TokenError { status });
        }

        self.tokens
            .lock()
            .unwrap()
            .insert(repo.to_string(), payload.token.clone());
        Ok(payload.token)
    }

    /// Drop the cached token for a repository.
    pub fn evict_token(&self, repo: &str) {
        self.tokens.lock().unwrap().remove(repo);
    }

    #[cfg(test)]
    fn cache_token(&self, repo: &str, token: &str) {
        self.tokens
            .lock()
            .unwrap()
            .insert(repo.to_string(), token.to_string());
    }
}

fn header(resp: &reqwest::Response, name: &str) -> String {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
