//! Scan planning over a resolved [`Snapshot`].

use std::sync::Arc;

use crate::expressions::Expression;
use crate::schema::SchemaRef;
use crate::snapshot::Snapshot;
use crate::{Engine, SlateResult};

pub mod log_replay;
pub mod state;

pub use log_replay::{ScanDataBatch, ScanFile};
pub use state::{visit_scan_files, DvInfo, GlobalScanState, ScanCallback, ScanDataIterator};

/// Builder to scan a snapshot of a table.
pub struct ScanBuilder {
    snapshot: Arc<Snapshot>,
    projection: Option<Vec<String>>,
    predicate: Option<Expression>,
}

impl std::fmt::Debug for ScanBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        f.debug_struct("ScanBuilder")
            .field("projection", &self.projection)
            .field("predicate", &self.predicate)
            .finish()
    }
}

impl ScanBuilder {
    pub fn new(snapshot: Arc<Snapshot>) -> Self {
        Self {
            snapshot,
            projection: None,
            predicate: None,
        }
    }

    /// Select a subset of the table's columns. A table with columns
    /// `[a, b, c]` can be scanned with projection `[a, b]` to read only those
    /// two. Validated against the snapshot schema at `build` time.
    pub fn with_projection(
        mut self,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.projection = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Attach a predicate. The kernel stores it for the host's evaluation
    /// layer; it is never evaluated here.
    pub fn with_predicate(mut self, predicate: Expression) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Build the [`Scan`]. Lazy: no storage is touched until
    /// [`Scan::scan_data`] is driven.
    pub fn build(self) -> SlateResult<Scan> {
        let read_schema = match self.projection {
            // if no projection is provided, read the snapshot's entire schema
            None => self.snapshot.schema_ref(),
            Some(columns) => Arc::new(self.snapshot.schema().project(&columns)?),
        };
        Ok(Scan {
            snapshot: self.snapshot,
            read_schema,
            predicate: self.predicate,
        })
    }
}

/// A planned read over one snapshot. Immutable; cheap to share.
pub struct Scan {
    snapshot: Arc<Snapshot>,
    read_schema: SchemaRef,
    predicate: Option<Expression>,
}

impl std::fmt::Debug for Scan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        f.debug_struct("Scan")
            .field("read_schema", &self.read_schema)
            .field("predicate", &self.predicate)
            .finish()
    }
}

impl Scan {
    /// The schema this scan will produce (projected, if a projection was set).
    pub fn schema(&self) -> &SchemaRef {
        &self.read_schema
    }

    /// The stored predicate, for the host's evaluation layer.
    pub fn predicate(&self) -> Option<&Expression> {
        self.predicate.as_ref()
    }

    pub fn snapshot(&self) -> &Arc<Snapshot> {
        &self.snapshot
    }

    /// Scan-wide invariants every batch shares.
    pub fn global_scan_state(&self) -> GlobalScanState {
        GlobalScanState {
            table_root: self.snapshot.table_root.to_string(),
            partition_columns: self.snapshot.metadata().partition_columns.clone(),
            logical_schema: self.snapshot.schema_ref(),
            read_schema: self.read_schema.clone(),
            version: self.snapshot.version(),
        }
    }

    /// Materialize the scan as a pull-based iterator over scan-file batches.
    /// Each batch pairs kernel-produced [`ScanDataBatch`] metadata with a
    /// coarse selection vector reflecting log-level add/remove dedup.
    pub fn scan_data(&self, engine: Arc<dyn Engine>) -> SlateResult<ScanDataIterator> {
        Ok(ScanDataIterator::new(
            engine,
            self.snapshot.log_segment.clone(),
        ))
    }
}
