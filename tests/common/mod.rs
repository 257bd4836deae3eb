//! Shared test support: an in-memory remote store.
#![allow(dead_code)]

use almanac::{RemoteDocument, RemoteError, RemoteStore};
use chrono::{DateTime, Utc};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

struct StoredFile {
    content: String,
    revision: String,
    modified: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
    files: RefCell<HashMap<String, StoredFile>>,
    next_revision: Cell<u64>,
    puts: RefCell<Vec<String>>,
    conflict_paths: RefCell<HashSet<String>>,
}

/// An in-memory `RemoteStore` with GitHub-like optimistic concurrency.
/// Clones share state, so a test can keep a handle after boxing one for
/// the engine.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    inner: Rc<Inner>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn mint_revision(&self) -> String {
        let n = self.inner.next_revision.get() + 1;
        self.inner.next_revision.set(n);
        format!("rev-{}", n)
    }

    /// Seed a file directly, bypassing revision checks.
    pub fn seed_file(&self, path: &str, content: &str, modified: Option<DateTime<Utc>>) {
        let revision = self.mint_revision();
        self.inner.files.borrow_mut().insert(
            path.to_string(),
            StoredFile {
                content: content.to_string(),
                revision,
                modified,
            },
        );
    }

    /// Override a file's last-modified stamp.
    pub fn set_modified(&self, path: &str, modified: Option<DateTime<Utc>>) {
        if let Some(file) = self.inner.files.borrow_mut().get_mut(path) {
            file.modified = modified;
        }
    }

    /// Make every subsequent write to `path` fail with a stale-revision
    /// conflict, as if another writer always got there first.
    pub fn force_conflict_on(&self, path: &str) {
        self.inner.conflict_paths.borrow_mut().insert(path.to_string());
    }

    pub fn content(&self, path: &str) -> Option<String> {
        self.inner
            .files
            .borrow()
            .get(path)
            .map(|f| f.content.clone())
    }

    pub fn has_file(&self, path: &str) -> bool {
        self.inner.files.borrow().contains_key(path)
    }

    /// Paths written so far, in order.
    pub fn puts(&self) -> Vec<String> {
        self.inner.puts.borrow().clone()
    }

    pub fn put_count(&self) -> usize {
        self.inner.puts.borrow().len()
    }
}

impl RemoteStore for MemoryRemote {
    fn get_document(&self, path: &str) -> Result<RemoteDocument, RemoteError> {
        let files = self.inner.files.borrow();
        match files.get(path) {
            Some(file) => Ok(RemoteDocument {
                content: file.content.clone(),
                revision: file.revision.clone(),
            }),
            None => Err(RemoteError::NotFound(path.to_string())),
        }
    }

    fn put_document(
        &self,
        path: &str,
        content: &str,
        revision: Option<&str>,
    ) -> Result<String, RemoteError> {
        if self.inner.conflict_paths.borrow().contains(path) {
            return Err(RemoteError::RevisionConflict {
                path: path.to_string(),
            });
        }

        let mut files = self.inner.files.borrow_mut();
        let stale = match (files.get(path), revision) {
            (Some(existing), Some(supplied)) => existing.revision != supplied,
            // Creating over an existing file, or updating a missing one
            (Some(_), None) | (None, Some(_)) => true,
            (None, None) => false,
        };
        if stale {
            return Err(RemoteError::RevisionConflict {
                path: path.to_string(),
            });
        }

        let new_revision = self.mint_revision();
        files.insert(
            path.to_string(),
            StoredFile {
                content: content.to_string(),
                revision: new_revision.clone(),
                modified: Some(Utc::now()),
            },
        );
        self.inner.puts.borrow_mut().push(path.to_string());
        Ok(new_revision)
    }

    fn last_modified(&self, path: &str) -> Result<Option<DateTime<Utc>>, RemoteError> {
        Ok(self
            .inner
            .files
            .borrow()
            .get(path)
            .and_then(|f| f.modified))
    }
}
