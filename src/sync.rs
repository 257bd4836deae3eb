//! Bidirectional sync engine
//!
//! Orchestrates pull/compare/push between the local store and a remote
//! document store. Divergence is judged against the document's
//! `lastSynced` marker: the local side changed when the store was written
//! after the marker, the remote side changed when its last-modified
//! timestamp is past the marker. When both sides changed the engine stops
//! and surfaces a conflict for the user to resolve; it never picks a
//! winner on its own, and a stale-revision rejection during a push is
//! escalated to the same conflict path rather than retried with an
//! overwrite.
//!
//! States: `Idle -> Syncing -> {Idle, ConflictPending}`, and
//! `ConflictPending -> Idle` on resolution or cancel. The engine assumes
//! one in-flight call at a time; a nested call is rejected, not queued.

use crate::layout::{self, RemoteLayout, RemotePaths, RemoteSnapshot};
use crate::model::AppData;
use crate::remote::{RemoteError, RemoteStore};
use crate::store::{LocalStore, StoreError};
use chrono::{DateTime, Utc};
use log::{info, warn};

/// What a sync cycle did. Drives user-facing notification text only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Local changes were written to the remote.
    Pushed,
    /// Remote changes were written to the local store.
    Pulled,
    /// Neither side changed since the last sync.
    UpToDate,
    /// Both sides changed; resolution is deferred to an explicit call.
    Conflict,
}

impl std::fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncOutcome::Pushed => write!(f, "pushed"),
            SyncOutcome::Pulled => write!(f, "pulled"),
            SyncOutcome::UpToDate => write!(f, "up-to-date"),
            SyncOutcome::Conflict => write!(f, "conflict"),
        }
    }
}

/// The user's answer to a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Local wins: push the local document to the remote.
    Local,
    /// Remote wins: overwrite the local store with the remote document.
    Remote,
    /// Leave both sides untouched; the next sync re-detects the conflict.
    Cancel,
}

/// Snapshot of both sides at the moment divergence was detected.
#[derive(Debug, Clone)]
pub struct SyncConflict {
    pub local: AppData,
    pub remote: AppData,
    pub local_modified: Option<DateTime<Utc>>,
    pub remote_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Syncing,
    ConflictPending,
}

/// Error type for sync operations.
#[derive(Debug)]
pub enum SyncError {
    /// A sync or resolution call is already in flight.
    Busy,
    /// `resolve_conflict` was called with no conflict pending.
    NoConflict,
    Store(StoreError),
    Remote(RemoteError),
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Busy => write!(f, "a sync is already in flight"),
            SyncError::NoConflict => write!(f, "no conflict is pending"),
            SyncError::Store(e) => write!(f, "{}", e),
            SyncError::Remote(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        SyncError::Store(e)
    }
}

impl From<RemoteError> for SyncError {
    fn from(e: RemoteError) -> Self {
        SyncError::Remote(e)
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// The sync orchestrator. Owns the local store for the duration of its
/// life; all local mutation goes through its apply paths.
pub struct SyncEngine {
    store: LocalStore,
    remote: Box<dyn RemoteStore>,
    paths: RemotePaths,
    state: EngineState,
    conflict: Option<SyncConflict>,
}

impl SyncEngine {
    pub fn new(store: LocalStore, remote: Box<dyn RemoteStore>, paths: RemotePaths) -> Self {
        Self {
            store,
            remote,
            paths,
            state: EngineState::Idle,
            conflict: None,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn pending_conflict(&self) -> Option<&SyncConflict> {
        self.conflict.as_ref()
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Run one full sync cycle.
    ///
    /// The remote document is fetched and fully parsed before anything
    /// local changes, and the local document is persisted before the
    /// `lastSynced` marker advances — a crash mid-cycle never leaves the
    /// marker ahead of the data. On any error the engine returns to
    /// `Idle` with local state untouched.
    pub fn sync_bidirectional(&mut self) -> Result<SyncOutcome> {
        if self.state == EngineState::Syncing {
            return Err(SyncError::Busy);
        }
        // Re-running a sync over an unresolved conflict re-detects it
        // from scratch, same as cancel-then-sync.
        self.conflict = None;
        self.state = EngineState::Syncing;

        let result = self.sync_inner();
        self.state = match &result {
            Ok(SyncOutcome::Conflict) => EngineState::ConflictPending,
            _ => EngineState::Idle,
        };
        result
    }

    fn sync_inner(&mut self) -> Result<SyncOutcome> {
        let local = self.store.load()?;
        let local_modified = self.store.last_modified()?;
        let last_synced = local.last_synced;

        let Some((remote_data, snapshot)) = layout::load_auto_detect(self.remote.as_ref(), &self.paths)?
        else {
            // Nothing remote yet: first push, split layout from the start.
            layout::push_with_snapshot(
                self.remote.as_ref(),
                &self.paths,
                &local,
                &RemoteSnapshot::default(),
            )?;
            self.stamp_last_synced(local)?;
            info!("remote was empty; pushed the local document");
            return Ok(SyncOutcome::Pushed);
        };

        if last_synced.is_none() && !remote_data.is_empty() {
            // A device that has never synced adopts the remote wholesale.
            self.apply_remote(remote_data)?;
            info!("first sync on this device; pulled the remote document");
            return Ok(SyncOutcome::Pulled);
        }

        let remote_modified = self.remote_last_modified(&snapshot);
        let local_changed = changed_since(local_modified, last_synced);
        let remote_changed = changed_since(remote_modified, last_synced);

        match (local_changed, remote_changed) {
            (false, false) => Ok(SyncOutcome::UpToDate),
            (true, false) => {
                match layout::push_with_snapshot(self.remote.as_ref(), &self.paths, &local, &snapshot)
                {
                    Ok(()) => {
                        self.stamp_last_synced(local)?;
                        Ok(SyncOutcome::Pushed)
                    }
                    // Someone wrote between our fetch and our push. Same
                    // situation as "both changed": hand it to the user.
                    Err(RemoteError::RevisionConflict { path }) => {
                        warn!("push rejected on {}; escalating to conflict", path);
                        self.conflict = Some(SyncConflict {
                            local,
                            remote: remote_data,
                            local_modified,
                            remote_modified,
                        });
                        Ok(SyncOutcome::Conflict)
                    }
                    Err(e) => Err(e.into()),
                }
            }
            (false, true) => {
                self.apply_remote(remote_data)?;
                Ok(SyncOutcome::Pulled)
            }
            (true, true) => {
                self.conflict = Some(SyncConflict {
                    local,
                    remote: remote_data,
                    local_modified,
                    remote_modified,
                });
                Ok(SyncOutcome::Conflict)
            }
        }
    }

    /// Apply the user's conflict decision. Clears the pending conflict in
    /// every case; errors still return the engine to `Idle` and the next
    /// sync re-detects the divergence.
    pub fn resolve_conflict(&mut self, choice: Resolution) -> Result<SyncOutcome> {
        if self.state == EngineState::Syncing {
            return Err(SyncError::Busy);
        }
        let conflict = self.conflict.take().ok_or(SyncError::NoConflict)?;
        self.state = EngineState::Syncing;

        let result = self.resolve_inner(choice, conflict);
        self.state = EngineState::Idle;
        result
    }

    fn resolve_inner(&mut self, choice: Resolution, conflict: SyncConflict) -> Result<SyncOutcome> {
        match choice {
            Resolution::Cancel => {
                info!("conflict left unresolved");
                Ok(SyncOutcome::Conflict)
            }
            Resolution::Local => {
                // The local snapshot becomes the remote state. Writes go
                // against the revisions the remote holds right now; this
                // is the one deliberate overwrite in the system.
                self.force_push(&conflict.local)?;
                self.stamp_last_synced(conflict.local)?;
                Ok(SyncOutcome::Pushed)
            }
            Resolution::Remote => {
                self.apply_remote(conflict.remote)?;
                Ok(SyncOutcome::Pulled)
            }
        }
    }

    /// Overwrite the remote with `data` under whatever layout it holds.
    fn force_push(&self, data: &AppData) -> Result<()> {
        let layout = layout::detect_layout(self.remote.as_ref(), &self.paths)?;
        match layout {
            RemoteLayout::Legacy => {
                let content = serde_json::to_string_pretty(data)
                    .map_err(|e| RemoteError::Parse(format!("encoding document: {}", e)))?;
                crate::remote::put_with_current_revision(
                    self.remote.as_ref(),
                    self.paths.legacy(),
                    &content,
                )?;
                Ok(())
            }
            RemoteLayout::Split | RemoteLayout::Absent => {
                layout::save_split(self.remote.as_ref(), &self.paths, data)?;
                Ok(())
            }
        }
    }

    /// Persist `data` locally with a fresh `lastSynced` marker. One
    /// atomic write, so the marker can never be ahead of the data.
    fn stamp_last_synced(&self, data: AppData) -> Result<()> {
        self.store.save_synced(data)?;
        Ok(())
    }

    /// Replace the local document with the (fully parsed) remote one.
    fn apply_remote(&self, remote_data: AppData) -> Result<()> {
        self.stamp_last_synced(remote_data)
    }

    /// Newest last-modified across the files the load touched. Best
    /// effort: a backend without history yields `None` for that file.
    fn remote_last_modified(&self, snapshot: &RemoteSnapshot) -> Option<DateTime<Utc>> {
        let paths: Vec<String> = match snapshot.layout {
            RemoteLayout::Legacy => vec![self.paths.legacy().to_string()],
            RemoteLayout::Split => self.paths.split_files().to_vec(),
            RemoteLayout::Absent => return None,
        };

        let mut newest = None;
        for path in paths {
            match self.remote.last_modified(&path) {
                Ok(Some(stamp)) => {
                    if Some(stamp) > newest {
                        newest = Some(stamp);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("no history for {}: {}", path, e),
            }
        }
        newest
    }
}

/// Did `modified` land after the `last_synced` marker? A side with no
/// marker counts as changed whenever it has a modification stamp at all.
fn changed_since(modified: Option<DateTime<Utc>>, last_synced: Option<DateTime<Utc>>) -> bool {
    match (modified, last_synced) {
        (Some(m), Some(ls)) => m > ls,
        (Some(_), None) => true,
        (None, _) => false,
    }
}
