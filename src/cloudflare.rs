//! Cloudflare Worker sync endpoint
//!
//! The Worker keeps one document per user in D1 and exposes a two-call
//! REST surface: `POST /api/sync` uploads the full document and answers
//! with the server-side `lastSynced` stamp, `GET /api/sync` downloads it
//! (optionally only when newer than a supplied stamp). Requests carry an
//! `X-API-Key` header when a key is configured.
//!
//! The endpoint is not path-addressed, so the `RemoteStore` impl treats
//! it as a single-document (legacy-layout) store: every path maps to the
//! whole document and the server stamp doubles as the revision token.

use crate::model::AppData;
use crate::remote::{RemoteDocument, RemoteError, RemoteStore, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct CloudflareRemote {
    agent: ureq::Agent,
    api_url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct PushBody<'a> {
    data: &'a AppData,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushResponse {
    last_synced: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    last_synced: Option<DateTime<Utc>>,
    data: Option<AppData>,
}

impl CloudflareRemote {
    pub fn new(api_url: impl Into<String>, api_key: Option<String>) -> Self {
        let mut api_url = api_url.into();
        while api_url.ends_with('/') {
            api_url.pop();
        }
        Self {
            agent: ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build(),
            api_url,
            api_key,
        }
    }

    fn sync_url(&self) -> String {
        format!("{}/api/sync", self.api_url)
    }

    fn apply_key(&self, request: ureq::Request) -> ureq::Request {
        match &self.api_key {
            Some(key) => request.set("X-API-Key", key),
            None => request,
        }
    }

    /// Upload the full document. Returns the server's `lastSynced` stamp.
    pub fn push(&self, data: &AppData) -> Result<DateTime<Utc>> {
        let response = self
            .apply_key(self.agent.post(&self.sync_url()))
            .send_json(PushBody { data })
            .map_err(|e| map_http_error(&self.sync_url(), e))?;

        let body = response
            .into_string()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let parsed: PushResponse = serde_json::from_str(&body)
            .map_err(|e| RemoteError::Parse(format!("sync upload response: {}", e)))?;
        Ok(parsed.last_synced)
    }

    /// Download the document, or `None` when the server holds nothing
    /// newer than `since` (or nothing at all).
    pub fn pull(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Option<(AppData, DateTime<Utc>)>> {
        let mut request = self.apply_key(self.agent.get(&self.sync_url()));
        if let Some(since) = since {
            request = request.query("lastSynced", &since.to_rfc3339());
        }

        let response = match request.call() {
            Ok(r) => r,
            Err(ureq::Error::Status(404, _)) => return Ok(None),
            Err(e) => return Err(map_http_error(&self.sync_url(), e)),
        };
        let body = response
            .into_string()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let parsed: PullResponse = serde_json::from_str(&body)
            .map_err(|e| RemoteError::Parse(format!("sync download response: {}", e)))?;

        match (parsed.data, parsed.last_synced) {
            (Some(data), Some(stamp)) => Ok(Some((data, stamp))),
            _ => Ok(None),
        }
    }
}

fn map_http_error(url: &str, err: ureq::Error) -> RemoteError {
    match err {
        ureq::Error::Status(401, _) | ureq::Error::Status(403, _) => {
            RemoteError::Auth("sync endpoint rejected the API key".to_string())
        }
        ureq::Error::Status(404, _) => RemoteError::NotFound(url.to_string()),
        ureq::Error::Status(code, _) => {
            RemoteError::Transport(format!("sync endpoint returned HTTP {}", code))
        }
        ureq::Error::Transport(t) => RemoteError::Transport(t.to_string()),
    }
}

impl RemoteStore for CloudflareRemote {
    fn get_document(&self, path: &str) -> Result<RemoteDocument> {
        let Some((data, stamp)) = self.pull(None)? else {
            return Err(RemoteError::NotFound(path.to_string()));
        };
        let content = serde_json::to_string_pretty(&data)
            .map_err(|e| RemoteError::Parse(format!("re-encoding document: {}", e)))?;
        Ok(RemoteDocument {
            content,
            revision: stamp.to_rfc3339(),
        })
    }

    fn put_document(&self, _path: &str, content: &str, _revision: Option<&str>) -> Result<String> {
        // The Worker is single-writer last-write-wins; it has no notion of
        // a stale revision, so the supplied revision is not enforced.
        let data: AppData = serde_json::from_str(content)
            .map_err(|e| RemoteError::Parse(format!("document is not valid AppData: {}", e)))?;
        let stamp = self.push(&data)?;
        Ok(stamp.to_rfc3339())
    }

    fn last_modified(&self, _path: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.pull(None)?.map(|(_, stamp)| stamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slashes_are_trimmed() {
        let remote = CloudflareRemote::new("https://sync.example.workers.dev///", None);
        assert_eq!(remote.sync_url(), "https://sync.example.workers.dev/api/sync");
    }

    #[test]
    fn push_body_wraps_collections_under_data() {
        let data = AppData::empty();
        let body = serde_json::to_string(&PushBody { data: &data }).unwrap();
        assert!(body.starts_with(r#"{"data":"#));
        assert!(body.contains(r#""tasks":[]"#));
    }

    #[test]
    fn pull_response_parses_camel_case_stamp() {
        let json = r#"{"lastSynced": "2024-01-02T00:00:00Z", "data": {"tasks": []}}"#;
        let parsed: PullResponse = serde_json::from_str(json).unwrap();
        assert!(parsed.last_synced.is_some());
        assert!(parsed.data.is_some());
    }
}
