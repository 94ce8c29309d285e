//! Snapshot resolution: a consistent, versioned view of table state.

use std::sync::Arc;

use tracing::debug;
use url::Url;

use crate::actions::{Action, Metadata, Protocol};
use crate::log_segment::LogSegment;
use crate::schema::{Schema, SchemaRef};
use crate::{Engine, Error, SlateResult, Version};

/// An immutable view of a table at one log version.
///
/// The active file set is not materialized here; it is resolved lazily by
/// [`crate::scan::Scan::scan_data`]. Reading a newer state of the table means
/// resolving a new `Snapshot`; an existing one never changes.
pub struct Snapshot {
    pub(crate) table_root: Url,
    pub(crate) log_segment: LogSegment,
    version: Version,
    metadata: Metadata,
    protocol: Protocol,
    schema: SchemaRef,
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        f.debug_struct("Snapshot")
            .field("table_root", &self.table_root.as_str())
            .field("version", &self.version)
            .finish()
    }
}

impl Snapshot {
    /// Resolve the state of the table at `requested_version`, or at the
    /// current head of the log when unspecified.
    pub fn try_new(
        table_root: Url,
        engine: &dyn Engine,
        requested_version: Option<Version>,
    ) -> SlateResult<Self> {
        let log_segment = LogSegment::try_new(
            &table_root,
            engine.storage_handler().as_ref(),
            requested_version,
        )?;
        let version = log_segment.end_version();
        debug!("resolving snapshot of {table_root} at version {version}");

        let (metadata, protocol) = Self::replay_for_metadata(engine, &log_segment)?;
        protocol.ensure_read_supported()?;
        let schema = Arc::new(metadata.parse_schema()?);

        Ok(Self {
            table_root,
            log_segment,
            version,
            metadata,
            protocol,
            schema,
        })
    }

    /// Walk commits newest to oldest until both the active `metaData` and
    /// `protocol` actions are found.
    fn replay_for_metadata(
        engine: &dyn Engine,
        log_segment: &LogSegment,
    ) -> SlateResult<(Metadata, Protocol)> {
        let mut metadata: Option<Metadata> = None;
        let mut protocol: Option<Protocol> = None;
        for commit in log_segment.commit_files.iter().rev() {
            for action in LogSegment::read_commit(engine, commit)? {
                match action {
                    Action::MetaData(m) if metadata.is_none() => metadata = Some(m),
                    Action::Protocol(p) if protocol.is_none() => protocol = Some(p),
                    _ => {}
                }
            }
            if metadata.is_some() && protocol.is_some() {
                break;
            }
        }
        match (metadata, protocol) {
            (Some(m), Some(p)) => Ok((m, p)),
            (None, _) => Err(Error::corrupt_log("no metaData action found in the log")),
            (_, None) => Err(Error::corrupt_log("no protocol action found in the log")),
        }
    }

    /// The version of the log this snapshot reflects.
    pub fn version(&self) -> Version {
        self.version
    }

    /// The table's logical schema at this version.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn schema_ref(&self) -> SchemaRef {
        self.schema.clone()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    pub fn table_root(&self) -> &Url {
        &self.table_root
    }
}
