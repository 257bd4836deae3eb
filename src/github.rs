//! GitHub Contents API remote
//!
//! Stores each document as a file in a GitHub repository. Reads and writes
//! go through `GET`/`PUT /repos/{owner}/{repo}/contents/{path}` with the
//! file sha as the optimistic-concurrency revision; last-modified comes
//! from the most recent commit touching the path. Content crosses the
//! wire base64-encoded, so both directions decode to raw bytes first and
//! validate UTF-8 whole instead of trusting a per-byte text decode.

use crate::remote::{RemoteDocument, RemoteError, RemoteStore, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const API_ROOT: &str = "https://api.github.com";
const USER_AGENT: &str = "almanac-sync";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// GitHub-backed remote store.
pub struct GithubRemote {
    agent: ureq::Agent,
    api_root: String,
    owner: String,
    repo: String,
    branch: Option<String>,
    token: String,
}

#[derive(Deserialize)]
struct ContentsResponse {
    sha: String,
    content: Option<String>,
    encoding: Option<String>,
}

#[derive(Serialize)]
struct PutRequest<'a> {
    message: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
}

#[derive(Deserialize)]
struct PutResponse {
    content: Option<PutContent>,
}

#[derive(Deserialize)]
struct PutContent {
    sha: String,
}

#[derive(Deserialize)]
struct CommitItem {
    commit: CommitDetail,
}

#[derive(Deserialize)]
struct CommitDetail {
    committer: Option<CommitSignature>,
    author: Option<CommitSignature>,
}

#[derive(Deserialize)]
struct CommitSignature {
    date: Option<DateTime<Utc>>,
}

impl GithubRemote {
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        branch: Option<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build(),
            api_root: API_ROOT.to_string(),
            owner: owner.into(),
            repo: repo.into(),
            branch,
            token: token.into(),
        }
    }

    /// Point at a different API root (GitHub Enterprise, test servers).
    pub fn with_api_root(mut self, api_root: impl Into<String>) -> Self {
        self.api_root = api_root.into();
        self
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_root, self.owner, self.repo, path
        )
    }

    fn commits_url(&self) -> String {
        format!("{}/repos/{}/{}/commits", self.api_root, self.owner, self.repo)
    }

    fn authorization(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

/// Map an HTTP-level failure onto the remote error taxonomy.
fn map_http_error(path: &str, err: ureq::Error) -> RemoteError {
    match err {
        ureq::Error::Status(404, _) => RemoteError::NotFound(path.to_string()),
        ureq::Error::Status(401, _) | ureq::Error::Status(403, _) => {
            RemoteError::Auth(format!("GitHub rejected the token for {}", path))
        }
        // Sha mismatch surfaces as 409 or 422 depending on the endpoint.
        ureq::Error::Status(409, _) | ureq::Error::Status(422, _) => {
            RemoteError::RevisionConflict { path: path.to_string() }
        }
        ureq::Error::Status(code, _) => {
            RemoteError::Transport(format!("GitHub returned HTTP {} for {}", code, path))
        }
        ureq::Error::Transport(t) => RemoteError::Transport(t.to_string()),
    }
}

/// Decode a Contents API payload: strip the newlines GitHub inserts into
/// the base64 stream, decode to bytes, then validate UTF-8 whole so
/// multi-byte characters survive intact.
fn decode_content(raw: &str) -> Result<String> {
    let stripped: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = BASE64
        .decode(stripped.as_bytes())
        .map_err(|e| RemoteError::Parse(format!("invalid base64 content: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| RemoteError::Parse(format!("content is not UTF-8: {}", e)))
}

fn encode_content(content: &str) -> String {
    BASE64.encode(content.as_bytes())
}

impl RemoteStore for GithubRemote {
    fn get_document(&self, path: &str) -> Result<RemoteDocument> {
        let mut request = self
            .agent
            .get(&self.contents_url(path))
            .set("Authorization", &self.authorization())
            .set("Accept", "application/vnd.github+json")
            .set("User-Agent", USER_AGENT);
        if let Some(branch) = &self.branch {
            request = request.query("ref", branch);
        }

        let response = request.call().map_err(|e| map_http_error(path, e))?;
        let body = response
            .into_string()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        let parsed: ContentsResponse = serde_json::from_str(&body)
            .map_err(|e| RemoteError::Parse(format!("contents response for {}: {}", path, e)))?;

        if let Some(encoding) = &parsed.encoding {
            if encoding != "base64" {
                return Err(RemoteError::Parse(format!(
                    "unsupported content encoding {:?} for {}",
                    encoding, path
                )));
            }
        }
        let raw = parsed.content.ok_or_else(|| {
            RemoteError::Parse(format!("{} has no inline content (is it a directory?)", path))
        })?;

        Ok(RemoteDocument {
            content: decode_content(&raw)?,
            revision: parsed.sha,
        })
    }

    fn put_document(&self, path: &str, content: &str, revision: Option<&str>) -> Result<String> {
        let body = PutRequest {
            message: format!("almanac: update {}", path),
            content: encode_content(content),
            sha: revision,
            branch: self.branch.as_deref(),
        };

        let response = self
            .agent
            .put(&self.contents_url(path))
            .set("Authorization", &self.authorization())
            .set("Accept", "application/vnd.github+json")
            .set("User-Agent", USER_AGENT)
            .send_json(&body)
            .map_err(|e| map_http_error(path, e))?;

        let body = response
            .into_string()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let parsed: PutResponse = serde_json::from_str(&body)
            .map_err(|e| RemoteError::Parse(format!("put response for {}: {}", path, e)))?;

        parsed
            .content
            .map(|c| c.sha)
            .ok_or_else(|| RemoteError::Parse(format!("put response for {} lacks a sha", path)))
    }

    fn last_modified(&self, path: &str) -> Result<Option<DateTime<Utc>>> {
        let mut request = self
            .agent
            .get(&self.commits_url())
            .set("Authorization", &self.authorization())
            .set("Accept", "application/vnd.github+json")
            .set("User-Agent", USER_AGENT)
            .query("path", path)
            .query("per_page", "1");
        if let Some(branch) = &self.branch {
            request = request.query("sha", branch);
        }

        let response = match request.call() {
            Ok(r) => r,
            // An empty repository answers 404/409 on the commits listing;
            // history is simply unavailable.
            Err(ureq::Error::Status(404, _)) | Err(ureq::Error::Status(409, _)) => {
                return Ok(None)
            }
            Err(e) => return Err(map_http_error(path, e)),
        };
        let body = response
            .into_string()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        let commits: Vec<CommitItem> = serde_json::from_str(&body)
            .map_err(|e| RemoteError::Parse(format!("commits response for {}: {}", path, e)))?;

        Ok(commits.first().and_then(|item| {
            item.commit
                .committer
                .as_ref()
                .and_then(|sig| sig.date)
                .or_else(|| item.commit.author.as_ref().and_then(|sig| sig.date))
        }))
    }
}
