//! Log replay with add/remove deduplication.
//!
//! Commits are processed newest to oldest. A `(path, dv-id)` key seen once —
//! whether as an add or a remove — suppresses every older add of the same
//! file version, so the newest state of each file wins.

use std::any::Any;
use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::actions::{Action, Add, DeletionVectorDescriptor};
use crate::engine_data::EngineData;
use crate::Version;

/// Identity of one file version in the log.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct FileActionKey {
    path: String,
    dv_unique_id: Option<String>,
}

impl FileActionKey {
    fn new(path: &str, dv_unique_id: Option<String>) -> Self {
        Self {
            path: path.to_string(),
            dv_unique_id,
        }
    }
}

/// One candidate data file surfaced by a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanFile {
    /// Path relative to the table root (or absolute).
    pub path: String,
    /// Size of the file in bytes.
    pub size: i64,
    /// Logical row count before deletion-vector filtering, when recorded.
    pub num_records: Option<u64>,
    pub partition_values: HashMap<String, String>,
    pub deletion_vector: Option<DeletionVectorDescriptor>,
}

impl From<Add> for ScanFile {
    fn from(add: Add) -> Self {
        let num_records = add.num_records();
        Self {
            path: add.path,
            size: add.size,
            num_records,
            partition_values: add.partition_values,
            deletion_vector: add.deletion_vector,
        }
    }
}

/// A batch of scan-file metadata: one row per add action found in a single
/// commit, in file order. Opaque [`EngineData`] at the boundary; exploded
/// row-by-row via [`crate::scan::visit_scan_files`].
#[derive(Debug)]
pub struct ScanDataBatch {
    pub(crate) version: Version,
    pub(crate) files: Vec<ScanFile>,
}

impl ScanDataBatch {
    /// The commit version this batch came from.
    pub fn version(&self) -> Version {
        self.version
    }
}

impl EngineData for ScanDataBatch {
    fn len(&self) -> usize {
        self.files.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Stateful dedup over a newest-to-oldest walk of the log.
pub(crate) struct LogReplayScanner {
    seen: HashSet<FileActionKey>,
}

impl LogReplayScanner {
    pub(crate) fn new() -> Self {
        Self {
            seen: HashSet::new(),
        }
    }

    /// Fold one commit's actions into a batch plus its selection vector.
    /// Actions are taken in file order; a remove encountered here masks adds
    /// of the same key in this and every older commit.
    pub(crate) fn process_commit(
        &mut self,
        version: Version,
        actions: Vec<Action>,
    ) -> (ScanDataBatch, Vec<bool>) {
        let mut files = Vec::new();
        let mut selection = Vec::new();
        for action in actions {
            match action {
                Action::Add(add) => {
                    let key = FileActionKey::new(&add.path, add.dv_unique_id());
                    let selected = self.seen.insert(key);
                    debug!(
                        "commit {version}: add {} (selected={selected})",
                        add.path
                    );
                    files.push(ScanFile::from(add));
                    selection.push(selected);
                }
                Action::Remove(remove) => {
                    let key = FileActionKey::new(&remove.path, remove.dv_unique_id());
                    debug!("commit {version}: remove {}", remove.path);
                    self.seen.insert(key);
                }
                _ => {}
            }
        }
        (ScanDataBatch { version, files }, selection)
    }
}
