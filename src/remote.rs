//! Remote document store contract
//!
//! A remote is a stateless transport for JSON documents addressed by path.
//! Writes are optimistic: callers pass the revision they last saw, and a
//! stale revision comes back as `RevisionConflict` rather than a silent
//! overwrite.

use chrono::{DateTime, Utc};

/// Error taxonomy shared by all remote implementations.
#[derive(Debug)]
pub enum RemoteError {
    /// The path does not exist. Treated as "no data yet" by callers, not
    /// as a failure.
    NotFound(String),
    /// Credentials were rejected.
    Auth(String),
    /// The supplied revision is stale; someone else wrote first.
    RevisionConflict { path: String },
    /// Network failure or a 5xx from the remote.
    Transport(String),
    /// The response body did not have the expected shape.
    Parse(String),
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteError::NotFound(path) => write!(f, "Remote path not found: {}", path),
            RemoteError::Auth(msg) => write!(f, "Authentication failed: {}", msg),
            RemoteError::RevisionConflict { path } => {
                write!(f, "Stale revision writing {}: the remote changed underneath", path)
            }
            RemoteError::Transport(msg) => write!(f, "Transport error: {}", msg),
            RemoteError::Parse(msg) => write!(f, "Unexpected remote response: {}", msg),
        }
    }
}

impl std::error::Error for RemoteError {}

pub type Result<T> = std::result::Result<T, RemoteError>;

/// A fetched document plus the revision token to hand back on write.
#[derive(Debug, Clone)]
pub struct RemoteDocument {
    pub content: String,
    pub revision: String,
}

/// Capability set every remote backend provides. Implementations own no
/// document state of their own.
pub trait RemoteStore {
    /// Fetch a document. `NotFound` when the path does not exist.
    fn get_document(&self, path: &str) -> Result<RemoteDocument>;

    /// Write a document, creating it when `revision` is `None`. Returns
    /// the new revision. `RevisionConflict` when `revision` is stale.
    fn put_document(&self, path: &str, content: &str, revision: Option<&str>) -> Result<String>;

    /// Best-effort last-modified timestamp for a path; `None` when the
    /// backend cannot provide history.
    fn last_modified(&self, path: &str) -> Result<Option<DateTime<Utc>>>;
}

/// Fetch a path's current revision, then write with it. Creates the
/// document when it does not exist yet. This is the "forced" write used
/// where the caller has decided its content wins.
pub fn put_with_current_revision(
    remote: &dyn RemoteStore,
    path: &str,
    content: &str,
) -> Result<String> {
    let revision = match remote.get_document(path) {
        Ok(doc) => Some(doc.revision),
        Err(RemoteError::NotFound(_)) => None,
        Err(e) => return Err(e),
    };
    remote.put_document(path, content, revision.as_deref())
}
