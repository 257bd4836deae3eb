//! Remote layout: split files, legacy blob, and the migration between them
//!
//! Two remote layouts are supported indefinitely. The legacy layout is one
//! file holding the full document at the configured base path. The split
//! layout shards the document into five topical files living beside it:
//!
//! | File               | Slices                                      |
//! |--------------------|---------------------------------------------|
//! | `tasks.json`       | tasks, subTasks, projects, modes, tags      |
//! | `memos.json`       | memos, memoTemplates                        |
//! | `dailyRecords.json`| dailyRecords, routineExecutions             |
//! | `goals.json`       | goals, wishes                               |
//! | `settings.json`    | settings, lastSynced                        |
//!
//! Splitting and merging are pure inverses; everything else here is
//! layout-aware I/O on top of a [`RemoteStore`].

use crate::model::{
    AppData, DailyRecord, Goal, Memo, MemoTemplate, Mode, Project, RoutineExecution, Settings,
    SubTask, Tag, Task, Wish,
};
use crate::remote::{self, RemoteError, RemoteStore, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;

pub const TASKS_FILE: &str = "tasks.json";
pub const MEMOS_FILE: &str = "memos.json";
pub const DAILY_RECORDS_FILE: &str = "dailyRecords.json";
pub const GOALS_FILE: &str = "goals.json";
pub const SETTINGS_FILE: &str = "settings.json";
pub const MIGRATED_MARKER: &str = ".migrated";

/// Which layout a remote currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemoteLayout {
    Legacy,
    Split,
    #[default]
    Absent,
}

impl std::fmt::Display for RemoteLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteLayout::Legacy => write!(f, "legacy (single file)"),
            RemoteLayout::Split => write!(f, "split (five files)"),
            RemoteLayout::Absent => write!(f, "absent"),
        }
    }
}

/// Path arithmetic around the configured base path. With a base of
/// `data/tasks.json`, split siblings and archives land in `data/`.
#[derive(Debug, Clone)]
pub struct RemotePaths {
    base: String,
}

impl RemotePaths {
    pub fn new(base_path: impl Into<String>) -> Self {
        Self { base: base_path.into() }
    }

    /// The legacy single-file path: the base path itself.
    pub fn legacy(&self) -> &str {
        &self.base
    }

    fn dir(&self) -> &str {
        match self.base.rfind('/') {
            Some(idx) => &self.base[..idx],
            None => "",
        }
    }

    pub fn split_file(&self, name: &str) -> String {
        let dir = self.dir();
        if dir.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", dir, name)
        }
    }

    pub fn marker(&self) -> String {
        self.split_file(MIGRATED_MARKER)
    }

    pub fn archive(&self, year: i32) -> String {
        self.split_file(&format!("archive-{}.json", year))
    }

    pub fn split_files(&self) -> [String; 5] {
        [
            self.split_file(TASKS_FILE),
            self.split_file(MEMOS_FILE),
            self.split_file(DAILY_RECORDS_FILE),
            self.split_file(GOALS_FILE),
            self.split_file(SETTINGS_FILE),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct TasksSlice {
    pub tasks: Vec<Task>,
    pub sub_tasks: Vec<SubTask>,
    pub projects: Vec<Project>,
    pub modes: Vec<Mode>,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct MemosSlice {
    pub memos: Vec<Memo>,
    pub memo_templates: Vec<MemoTemplate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct DailySlice {
    pub daily_records: Vec<DailyRecord>,
    pub routine_executions: Vec<RoutineExecution>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct GoalsSlice {
    pub goals: Vec<Goal>,
    pub wishes: Vec<Wish>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsSlice {
    pub settings: Settings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced: Option<DateTime<Utc>>,
}

/// The five split payloads of one document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SplitFiles {
    pub tasks: TasksSlice,
    pub memos: MemosSlice,
    pub daily: DailySlice,
    pub goals: GoalsSlice,
    pub settings: SettingsSlice,
}

/// Shard a document into its five split payloads.
pub fn split_data(data: &AppData) -> SplitFiles {
    SplitFiles {
        tasks: TasksSlice {
            tasks: data.tasks.clone(),
            sub_tasks: data.sub_tasks.clone(),
            projects: data.projects.clone(),
            modes: data.modes.clone(),
            tags: data.tags.clone(),
        },
        memos: MemosSlice {
            memos: data.memos.clone(),
            memo_templates: data.memo_templates.clone(),
        },
        daily: DailySlice {
            daily_records: data.daily_records.clone(),
            routine_executions: data.routine_executions.clone(),
        },
        goals: GoalsSlice {
            goals: data.goals.clone(),
            wishes: data.wishes.clone(),
        },
        settings: SettingsSlice {
            settings: data.settings.clone(),
            last_synced: data.last_synced,
        },
    }
}

/// Reassemble a document from its five split payloads. Inverse of
/// [`split_data`].
pub fn merge_data(files: SplitFiles) -> AppData {
    AppData {
        tasks: files.tasks.tasks,
        sub_tasks: files.tasks.sub_tasks,
        projects: files.tasks.projects,
        modes: files.tasks.modes,
        tags: files.tasks.tags,
        memos: files.memos.memos,
        memo_templates: files.memos.memo_templates,
        daily_records: files.daily.daily_records,
        routine_executions: files.daily.routine_executions,
        goals: files.goals.goals,
        wishes: files.goals.wishes,
        settings: files.settings.settings,
        last_synced: files.settings.last_synced,
    }
}

/// What a layout-aware load observed: the layout plus the revision of
/// every file it fetched, for later optimistic writes.
#[derive(Debug, Clone, Default)]
pub struct RemoteSnapshot {
    pub layout: RemoteLayout,
    pub revisions: HashMap<String, String>,
}

/// Probe which layout the remote holds. The split probe runs first, so
/// split wins when both layouts are present.
///
/// With the default base path the legacy file and the split `tasks.json`
/// are the same path, so `tasks.json` cannot discriminate; `settings.json`
/// exists only under the split layout and is probed instead.
pub fn detect_layout(remote: &dyn RemoteStore, paths: &RemotePaths) -> Result<RemoteLayout> {
    let tasks = paths.split_file(TASKS_FILE);
    let probe = if tasks == paths.legacy() {
        paths.split_file(SETTINGS_FILE)
    } else {
        tasks
    };

    match remote.get_document(&probe) {
        Ok(_) => return Ok(RemoteLayout::Split),
        Err(RemoteError::NotFound(_)) => {}
        Err(e) => return Err(e),
    }
    match remote.get_document(paths.legacy()) {
        Ok(_) => Ok(RemoteLayout::Legacy),
        Err(RemoteError::NotFound(_)) => Ok(RemoteLayout::Absent),
        Err(e) => Err(e),
    }
}

fn fetch_slice<T: DeserializeOwned + Default>(
    remote: &dyn RemoteStore,
    path: &str,
    snapshot: &mut RemoteSnapshot,
) -> T {
    match remote.get_document(path) {
        Ok(doc) => {
            snapshot.revisions.insert(path.to_string(), doc.revision);
            match serde_json::from_str(&doc.content) {
                Ok(slice) => slice,
                Err(e) => {
                    warn!("{} is malformed, substituting an empty slice: {}", path, e);
                    T::default()
                }
            }
        }
        Err(RemoteError::NotFound(_)) => T::default(),
        Err(e) => {
            warn!("could not read {}, substituting an empty slice: {}", path, e);
            T::default()
        }
    }
}

/// Load the remote document whichever layout it is stored under.
///
/// Returns `None` when the remote holds no data at all. Under the split
/// layout a failed read of an individual file degrades to that slice's
/// empty default rather than failing the whole load; under the legacy
/// layout a malformed document is an error, because a document is only
/// accepted once it parses in full.
pub fn load_auto_detect(
    remote: &dyn RemoteStore,
    paths: &RemotePaths,
) -> Result<Option<(AppData, RemoteSnapshot)>> {
    let mut snapshot = RemoteSnapshot::default();

    match detect_layout(remote, paths)? {
        RemoteLayout::Absent => Ok(None),
        RemoteLayout::Split => {
            snapshot.layout = RemoteLayout::Split;
            let files = SplitFiles {
                tasks: fetch_slice(remote, &paths.split_file(TASKS_FILE), &mut snapshot),
                memos: fetch_slice(remote, &paths.split_file(MEMOS_FILE), &mut snapshot),
                daily: fetch_slice(remote, &paths.split_file(DAILY_RECORDS_FILE), &mut snapshot),
                goals: fetch_slice(remote, &paths.split_file(GOALS_FILE), &mut snapshot),
                settings: fetch_slice(remote, &paths.split_file(SETTINGS_FILE), &mut snapshot),
            };
            Ok(Some((merge_data(files), snapshot)))
        }
        RemoteLayout::Legacy => {
            let doc = remote.get_document(paths.legacy())?;
            snapshot.layout = RemoteLayout::Legacy;
            snapshot
                .revisions
                .insert(paths.legacy().to_string(), doc.revision);
            let data: AppData = serde_json::from_str(&doc.content)
                .map_err(|e| RemoteError::Parse(format!("{}: {}", paths.legacy(), e)))?;
            Ok(Some((data, snapshot)))
        }
    }
}

fn serialize_slice<T: Serialize>(path: &str, slice: &T) -> Result<String> {
    serde_json::to_string_pretty(slice)
        .map_err(|e| RemoteError::Parse(format!("encoding {}: {}", path, e)))
}

fn split_payloads(paths: &RemotePaths, data: &AppData) -> Result<Vec<(String, String)>> {
    let files = split_data(data);
    Ok(vec![
        (
            paths.split_file(TASKS_FILE),
            serialize_slice(TASKS_FILE, &files.tasks)?,
        ),
        (
            paths.split_file(MEMOS_FILE),
            serialize_slice(MEMOS_FILE, &files.memos)?,
        ),
        (
            paths.split_file(DAILY_RECORDS_FILE),
            serialize_slice(DAILY_RECORDS_FILE, &files.daily)?,
        ),
        (
            paths.split_file(GOALS_FILE),
            serialize_slice(GOALS_FILE, &files.goals)?,
        ),
        (
            paths.split_file(SETTINGS_FILE),
            serialize_slice(SETTINGS_FILE, &files.settings)?,
        ),
    ])
}

/// Write all five split files, each against its current remote revision.
///
/// Writes are independent: a failure on one file is logged and swallowed
/// so the remaining files still go out. The exception is a stale-revision
/// conflict, which is reported after every file has been attempted so it
/// can reach the conflict-resolution path.
pub fn save_split(remote: &dyn RemoteStore, paths: &RemotePaths, data: &AppData) -> Result<()> {
    let mut conflict = None;
    for (path, content) in split_payloads(paths, data)? {
        match remote::put_with_current_revision(remote, &path, &content) {
            Ok(_) => {}
            Err(e @ RemoteError::RevisionConflict { .. }) => conflict = Some(e),
            Err(e) => warn!("skipping {} this round: {}", path, e),
        }
    }
    match conflict {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// All-or-nothing variant of [`save_split`]: the first failure aborts the
/// remaining writes and is returned to the caller.
pub fn save_split_strict(
    remote: &dyn RemoteStore,
    paths: &RemotePaths,
    data: &AppData,
) -> Result<()> {
    for (path, content) in split_payloads(paths, data)? {
        remote::put_with_current_revision(remote, &path, &content)?;
    }
    Ok(())
}

/// Push a document using the revisions a previous load observed, under
/// the layout it observed. A write that hits a stale revision reports
/// `RevisionConflict` (after the remaining split files were attempted)
/// instead of refetching and overwriting.
pub fn push_with_snapshot(
    remote: &dyn RemoteStore,
    paths: &RemotePaths,
    data: &AppData,
    snapshot: &RemoteSnapshot,
) -> Result<()> {
    match snapshot.layout {
        RemoteLayout::Legacy => {
            let content = serde_json::to_string_pretty(data)
                .map_err(|e| RemoteError::Parse(format!("encoding document: {}", e)))?;
            let revision = snapshot.revisions.get(paths.legacy()).map(String::as_str);
            remote.put_document(paths.legacy(), &content, revision)?;
            Ok(())
        }
        // A fresh remote gets the split layout from the start.
        RemoteLayout::Split | RemoteLayout::Absent => {
            let mut conflict = None;
            for (path, content) in split_payloads(paths, data)? {
                let revision = snapshot.revisions.get(&path).map(String::as_str);
                match remote.put_document(&path, &content, revision) {
                    Ok(_) => {}
                    Err(e @ RemoteError::RevisionConflict { .. }) => conflict = Some(e),
                    Err(e) => warn!("skipping {} this round: {}", path, e),
                }
            }
            match conflict {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }
}

/// One-time legacy-to-split migration.
///
/// Reads the legacy document, writes the five split files, then drops a
/// `.migrated` marker beside them. Idempotent: a remote that already has
/// split files, or no legacy file at all, is left untouched.
pub fn migrate_legacy_to_split(remote: &dyn RemoteStore, paths: &RemotePaths) -> Result<()> {
    match detect_layout(remote, paths)? {
        RemoteLayout::Split => {
            info!("split layout already present; nothing to migrate");
            return Ok(());
        }
        RemoteLayout::Absent => {
            info!("no legacy document; nothing to migrate");
            return Ok(());
        }
        RemoteLayout::Legacy => {}
    }

    let doc = remote.get_document(paths.legacy())?;
    let data: AppData = serde_json::from_str(&doc.content)
        .map_err(|e| RemoteError::Parse(format!("{}: {}", paths.legacy(), e)))?;

    save_split_strict(remote, paths, &data)?;
    remote::put_with_current_revision(remote, &paths.marker(), &Utc::now().to_rfc3339())?;
    info!("migrated {} to the split layout", paths.legacy());
    Ok(())
}
