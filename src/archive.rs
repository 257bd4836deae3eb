//! Yearly archives for aged records
//!
//! Old daily records, completed tasks, and stale memos are swept into one
//! bundle per calendar year and persisted as `archive-<year>.json` beside
//! the main data path. The sweep is best-effort and non-destructive:
//! per-year write failures are logged and skipped, and archived records
//! stay in the live document until the caller removes them explicitly.

use crate::layout::RemotePaths;
use crate::model::{AppData, DailyRecord, Memo, Task};
use crate::remote::{self, RemoteError, RemoteStore};
use chrono::{DateTime, Datelike, Duration, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Age thresholds, in days, per record kind.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveConfig {
    pub daily_record_days: u32,
    pub completed_task_days: u32,
    pub memo_days: u32,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            daily_record_days: 365,
            completed_task_days: 365,
            memo_days: 365,
        }
    }
}

/// One calendar year's worth of archived records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ArchivedYearBundle {
    pub year: i32,
    pub daily_records: Vec<DailyRecord>,
    pub completed_tasks: Vec<Task>,
    pub old_memos: Vec<Memo>,
}

impl ArchivedYearBundle {
    pub fn is_empty(&self) -> bool {
        self.daily_records.is_empty() && self.completed_tasks.is_empty() && self.old_memos.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.daily_records.len() + self.completed_tasks.len() + self.old_memos.len()
    }
}

/// Partition aged records into per-year bundles. Pure; the live document
/// is not modified.
///
/// - daily records age by their date,
/// - tasks age by completion date (only completed tasks are considered),
/// - memos age by update date, falling back to creation date.
pub fn archive_old_data(
    data: &AppData,
    config: &ArchiveConfig,
    now: DateTime<Utc>,
) -> Vec<ArchivedYearBundle> {
    let daily_cutoff = now - Duration::days(i64::from(config.daily_record_days));
    let task_cutoff = now - Duration::days(i64::from(config.completed_task_days));
    let memo_cutoff = now - Duration::days(i64::from(config.memo_days));

    let mut bundles: BTreeMap<i32, ArchivedYearBundle> = BTreeMap::new();
    fn bundle_for(
        bundles: &mut BTreeMap<i32, ArchivedYearBundle>,
        year: i32,
    ) -> &mut ArchivedYearBundle {
        bundles.entry(year).or_insert_with(|| ArchivedYearBundle {
            year,
            ..Default::default()
        })
    }

    for record in &data.daily_records {
        if let Some(date) = record.date {
            if date < daily_cutoff.date_naive() {
                bundle_for(&mut bundles, date.year())
                    .daily_records
                    .push(record.clone());
            }
        }
    }

    for task in &data.tasks {
        if !task.is_done() {
            continue;
        }
        if let Some(completed_at) = task.completed_at {
            if completed_at < task_cutoff {
                bundle_for(&mut bundles, completed_at.year())
                    .completed_tasks
                    .push(task.clone());
            }
        }
    }

    for memo in &data.memos {
        if let Some(touched) = memo.last_touched() {
            if touched < memo_cutoff {
                bundle_for(&mut bundles, touched.year())
                    .old_memos
                    .push(memo.clone());
            }
        }
    }

    bundles.into_values().collect()
}

/// Persist each bundle to its `archive-<year>.json`, merging with any
/// bundle already stored for that year (by entity id, so re-running the
/// sweep does not duplicate records). Returns the years that were
/// written; failures are logged and skipped, never fatal to the sweep.
pub fn write_archives(
    remote: &dyn RemoteStore,
    paths: &RemotePaths,
    bundles: &[ArchivedYearBundle],
) -> Vec<i32> {
    let mut written = Vec::new();
    for bundle in bundles {
        if bundle.is_empty() {
            continue;
        }
        let path = paths.archive(bundle.year);

        let merged = match load_archived_data(remote, paths, bundle.year) {
            Ok(Some(existing)) => merge_bundles(existing, bundle),
            Ok(None) => bundle.clone(),
            Err(e) => {
                warn!("skipping archive for {}: {}", bundle.year, e);
                continue;
            }
        };

        let content = match serde_json::to_string_pretty(&merged) {
            Ok(c) => c,
            Err(e) => {
                warn!("skipping archive for {}: {}", bundle.year, e);
                continue;
            }
        };
        match remote::put_with_current_revision(remote, &path, &content) {
            Ok(_) => written.push(bundle.year),
            Err(e) => warn!("skipping archive for {}: {}", bundle.year, e),
        }
    }
    written
}

/// Fetch one year's bundle; `None` when no archive exists for that year.
pub fn load_archived_data(
    remote: &dyn RemoteStore,
    paths: &RemotePaths,
    year: i32,
) -> remote::Result<Option<ArchivedYearBundle>> {
    match remote.get_document(&paths.archive(year)) {
        Ok(doc) => {
            let bundle: ArchivedYearBundle = serde_json::from_str(&doc.content)
                .map_err(|e| RemoteError::Parse(format!("archive-{}.json: {}", year, e)))?;
            Ok(Some(bundle))
        }
        Err(RemoteError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Append a bundle's records back into the live collections. Pure merge,
/// no deduplication — avoiding a double restore is the caller's job.
pub fn restore_from_archive(bundle: &ArchivedYearBundle, data: &AppData) -> AppData {
    let mut restored = data.clone();
    restored
        .daily_records
        .extend(bundle.daily_records.iter().cloned());
    restored.tasks.extend(bundle.completed_tasks.iter().cloned());
    restored.memos.extend(bundle.old_memos.iter().cloned());
    restored
}

fn merge_bundles(mut existing: ArchivedYearBundle, incoming: &ArchivedYearBundle) -> ArchivedYearBundle {
    let have_record: Vec<&str> = existing.daily_records.iter().map(|r| r.id.as_str()).collect();
    let fresh_records: Vec<DailyRecord> = incoming
        .daily_records
        .iter()
        .filter(|r| !have_record.contains(&r.id.as_str()))
        .cloned()
        .collect();
    existing.daily_records.extend(fresh_records);

    let have_task: Vec<&str> = existing.completed_tasks.iter().map(|t| t.id.as_str()).collect();
    let fresh_tasks: Vec<Task> = incoming
        .completed_tasks
        .iter()
        .filter(|t| !have_task.contains(&t.id.as_str()))
        .cloned()
        .collect();
    existing.completed_tasks.extend(fresh_tasks);

    let have_memo: Vec<&str> = existing.old_memos.iter().map(|m| m.id.as_str()).collect();
    let fresh_memos: Vec<Memo> = incoming
        .old_memos
        .iter()
        .filter(|m| !have_memo.contains(&m.id.as_str()))
        .cloned()
        .collect();
    existing.old_memos.extend(fresh_memos);

    existing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskStatus;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn completed_task(title: &str, days_ago: i64) -> Task {
        let mut task = Task::new(title);
        task.status = TaskStatus::Done;
        task.completed_at = Some(now() - Duration::days(days_ago));
        task
    }

    #[test]
    fn task_completed_400_days_ago_is_archived_and_live_data_untouched() {
        let mut data = AppData::empty();
        data.tasks.push(completed_task("old", 400));

        let bundles = archive_old_data(&data, &ArchiveConfig::default(), now());
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].year, 2024); // 400 days before 2025-06-01
        assert_eq!(bundles[0].completed_tasks.len(), 1);

        // The sweep never removes records from the live document.
        assert_eq!(data.tasks.len(), 1);
    }

    #[test]
    fn recent_and_incomplete_tasks_stay_out() {
        let mut data = AppData::empty();
        data.tasks.push(completed_task("recent", 100));
        let mut open = Task::new("open but ancient");
        open.completed_at = Some(now() - Duration::days(900));
        data.tasks.push(open); // still Todo

        let bundles = archive_old_data(&data, &ArchiveConfig::default(), now());
        assert!(bundles.is_empty());
    }

    #[test]
    fn records_group_by_calendar_year() {
        let mut data = AppData::empty();
        data.tasks.push(completed_task("a", 400));
        data.tasks.push(completed_task("b", 800));

        let bundles = archive_old_data(&data, &ArchiveConfig::default(), now());
        let years: Vec<i32> = bundles.iter().map(|b| b.year).collect();
        assert_eq!(years, vec![2023, 2024]);
    }

    #[test]
    fn memo_ages_by_update_date_with_creation_fallback() {
        let mut data = AppData::empty();
        let mut touched = Memo::new("updated long ago");
        touched.created_at = Some(now() - Duration::days(800));
        touched.updated_at = Some(now() - Duration::days(10));
        data.memos.push(touched); // recently updated: stays

        let mut stale = Memo::new("never updated");
        stale.created_at = Some(now() - Duration::days(500));
        stale.updated_at = None;
        data.memos.push(stale);

        let bundles = archive_old_data(&data, &ArchiveConfig::default(), now());
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].old_memos.len(), 1);
        assert_eq!(bundles[0].old_memos[0].content, "never updated");
    }

    #[test]
    fn thresholds_are_independent() {
        let config = ArchiveConfig {
            daily_record_days: 30,
            completed_task_days: 365,
            memo_days: 365,
        };
        let mut data = AppData::empty();
        let mut record = DailyRecord::new((now() - Duration::days(60)).date_naive());
        record.journal = "two months back".to_string();
        data.daily_records.push(record);
        data.tasks.push(completed_task("recent", 60));

        let bundles = archive_old_data(&data, &config, now());
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].daily_records.len(), 1);
        assert!(bundles[0].completed_tasks.is_empty());
    }

    #[test]
    fn restore_appends_without_dedup() {
        let bundle = ArchivedYearBundle {
            year: 2023,
            completed_tasks: vec![completed_task("restored", 400)],
            ..Default::default()
        };
        let mut data = AppData::empty();
        data.tasks.push(completed_task("restored", 400));

        let restored = restore_from_archive(&bundle, &data);
        assert_eq!(restored.tasks.len(), 2);
    }

    #[test]
    fn merge_skips_records_already_archived() {
        let existing = ArchivedYearBundle {
            year: 2023,
            old_memos: vec![Memo {
                id: "m1".to_string(),
                content: "kept".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let incoming = ArchivedYearBundle {
            year: 2023,
            old_memos: vec![
                Memo {
                    id: "m1".to_string(),
                    content: "dup".to_string(),
                    ..Default::default()
                },
                Memo {
                    id: "m2".to_string(),
                    content: "new".to_string(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let merged = merge_bundles(existing, &incoming);
        assert_eq!(merged.old_memos.len(), 2);
        assert_eq!(merged.old_memos[0].content, "kept");
    }
}
