//! Scan-wide state, the scan-data iterator, and per-file visiting.

use std::sync::Arc;

use tracing::debug;
use url::Url;

use crate::actions::deletion_vector::{
    deletion_treemap_to_selection_vector, DeletionVectorDescriptor,
};
use crate::engine_data::EngineData;
use crate::log_segment::LogSegment;
use crate::path::ParsedLogPath;
use crate::scan::log_replay::{LogReplayScanner, ScanDataBatch};
use crate::schema::SchemaRef;
use crate::{Engine, Error, SlateResult, Version};

/// Invariants shared by every batch one scan produces.
#[derive(Debug, Clone)]
pub struct GlobalScanState {
    pub table_root: String,
    pub partition_columns: Vec<String>,
    /// The table's full logical schema.
    pub logical_schema: SchemaRef,
    /// The (possibly projected) schema this scan reads.
    pub read_schema: SchemaRef,
    pub version: Version,
}

/// A file's deletion-vector reference plus the row count needed to size its
/// selection vector. Read-only; embedded per row in scan-data batches.
#[derive(Debug, Clone)]
pub struct DvInfo {
    pub(crate) deletion_vector: Option<DeletionVectorDescriptor>,
    pub(crate) num_records: Option<u64>,
}

impl DvInfo {
    pub fn has_vector(&self) -> bool {
        self.deletion_vector.is_some()
    }

    /// Resolve this file's selection vector: `true` means the row survives.
    ///
    /// A file without a deletion vector excludes nothing; that path allocates
    /// the all-`true` vector without any storage access.
    pub fn get_selection_vector(
        &self,
        engine: &dyn Engine,
        table_root: &Url,
    ) -> SlateResult<Vec<bool>> {
        let row_count = self.num_records.ok_or_else(|| {
            Error::missing_data("file row count is required to size a selection vector")
        })?;
        match &self.deletion_vector {
            None => Ok(vec![true; row_count as usize]),
            Some(descriptor) => {
                let bitmap =
                    descriptor.read(engine.storage_handler().as_ref(), table_root)?;
                deletion_treemap_to_selection_vector(&bitmap, row_count)
            }
        }
    }
}

/// Callback invoked once per selected file row by [`visit_scan_files`].
pub type ScanCallback<T> = fn(
    context: &mut T,
    path: &str,
    size: i64,
    dv_info: DvInfo,
    partition_values: &std::collections::HashMap<String, String>,
);

/// Explode a scan-data batch into per-file callbacks, honoring the batch's
/// selection vector. `data` must be a batch produced by this kernel's scan;
/// anything else fails rather than being silently skipped.
pub fn visit_scan_files<T>(
    data: &dyn EngineData,
    selection_vector: &[bool],
    mut context: T,
    callback: ScanCallback<T>,
) -> SlateResult<T> {
    let batch = data
        .as_any()
        .downcast_ref::<ScanDataBatch>()
        .ok_or_else(|| Error::generic("expected scan data produced by this kernel"))?;
    for (i, file) in batch.files.iter().enumerate() {
        if !selection_vector.get(i).copied().unwrap_or(false) {
            continue;
        }
        let dv_info = DvInfo {
            deletion_vector: file.deletion_vector.clone(),
            num_records: file.num_records,
        };
        callback(
            &mut context,
            &file.path,
            file.size,
            dv_info,
            &file.partition_values,
        );
    }
    Ok(context)
}

enum IterState {
    Active {
        engine: Arc<dyn Engine>,
        /// Commits in replay (newest-first) order.
        commits: Vec<ParsedLogPath>,
        next_index: usize,
        scanner: LogReplayScanner,
    },
    /// No more batches; terminal success.
    Exhausted,
    /// Resources released; any further `next` is a caller bug.
    Closed,
}

/// Pull-based cursor over scan-file batches.
///
/// Single-owner: concurrent `next_batch` calls on one iterator are not
/// supported (distinct iterators over the same snapshot are). Once exhausted
/// it stays exhausted; once closed, any `next_batch` reports
/// [`Error::UseAfterClose`].
pub struct ScanDataIterator {
    state: IterState,
}

impl ScanDataIterator {
    pub(crate) fn new(engine: Arc<dyn Engine>, log_segment: LogSegment) -> Self {
        let commits = log_segment.commit_files.iter().rev().cloned().collect();
        Self {
            state: IterState::Active {
                engine,
                commits,
                next_index: 0,
                scanner: LogReplayScanner::new(),
            },
        }
    }

    /// Produce the next non-empty batch, or `Ok(None)` once the log is fully
    /// replayed. A read failure leaves the iterator usable and positioned at
    /// the failed commit: retrying the call resumes there, so no batch is
    /// ever skipped. The host decides whether to retry or `close`.
    pub fn next_batch(&mut self) -> SlateResult<Option<(ScanDataBatch, Vec<bool>)>> {
        let batch = match &mut self.state {
            IterState::Closed => return Err(Error::UseAfterClose),
            IterState::Exhausted => return Ok(None),
            IterState::Active {
                engine,
                commits,
                next_index,
                scanner,
            } => {
                let mut found = None;
                while *next_index < commits.len() {
                    let commit = &commits[*next_index];
                    // advance only once the commit is read: a failed read must
                    // stay in front of the cursor so a retry sees it again
                    let actions = LogSegment::read_commit(engine.as_ref(), commit)?;
                    *next_index += 1;
                    let (batch, selection) = scanner.process_commit(commit.version, actions);
                    if !batch.is_empty() {
                        found = Some((batch, selection));
                        break;
                    }
                }
                found
            }
        };
        if batch.is_none() {
            self.state = IterState::Exhausted;
        }
        Ok(batch)
    }

    /// Release all resources. Always safe; the only valid way to abandon a
    /// partially consumed iterator.
    pub fn close(&mut self) {
        debug!("closing scan data iterator");
        self.state = IterState::Closed;
    }
}

impl Drop for ScanDataIterator {
    fn drop(&mut self) {
        debug!("dropping scan data iterator");
    }
}
