//! Almanac - personal productivity data with remote sync
//!
//! One JSON document holds everything: tasks, projects, memos, goals,
//! daily records, settings. This crate is the data layer around it — a
//! local file store, remote adapters (a GitHub repository or a Cloudflare
//! Worker), the split/legacy remote layout handling, a bidirectional sync
//! engine with manual conflict resolution, and yearly archives for aged
//! records.
//!
//! # Sync model
//!
//! | Situation                     | Outcome      |
//! |-------------------------------|--------------|
//! | Remote absent                 | `pushed`     |
//! | First sync on a device        | `pulled`     |
//! | Only local changed            | `pushed`     |
//! | Only remote changed           | `pulled`     |
//! | Neither changed               | `up-to-date` |
//! | Both changed / stale revision | `conflict`   |
//!
//! A conflict is never auto-resolved: the engine snapshots both sides and
//! waits for an explicit local/remote/cancel decision.
//!
//! # Quick Start
//!
//! ```no_run
//! use almanac::{GithubRemote, LocalStore, RemotePaths, SyncEngine, SyncOutcome};
//!
//! let store = LocalStore::open(".almanac/almanac.json");
//! let remote = GithubRemote::new("someone", "life-data", None, "token");
//! let paths = RemotePaths::new("data/tasks.json");
//!
//! let mut engine = SyncEngine::new(store, Box::new(remote), paths);
//! match engine.sync_bidirectional().unwrap() {
//!     SyncOutcome::Conflict => println!("both sides changed; resolve first"),
//!     outcome => println!("sync: {}", outcome),
//! }
//! ```

pub mod archive;
pub mod cloudflare;
pub mod config;
pub mod github;
pub mod layout;
pub mod model;
pub mod remote;
pub mod store;
pub mod sync;

pub use archive::{archive_old_data, restore_from_archive, ArchiveConfig, ArchivedYearBundle};
pub use cloudflare::CloudflareRemote;
pub use config::Config;
pub use github::GithubRemote;
pub use layout::{
    detect_layout, merge_data, migrate_legacy_to_split, split_data, RemoteLayout, RemotePaths,
    RemoteSnapshot, SplitFiles,
};
pub use model::{AppData, DailyRecord, Goal, Memo, Task, TaskStatus};
pub use remote::{RemoteDocument, RemoteError, RemoteStore};
pub use store::{LocalStore, StoreError};
pub use sync::{EngineState, Resolution, SyncConflict, SyncEngine, SyncError, SyncOutcome};
