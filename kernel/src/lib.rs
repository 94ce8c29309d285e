//! Slate kernel: snapshot-consistent scan planning for slate tables.
//!
//! A slate table is a directory of data files plus a `_slate_log/` directory of
//! zero-padded, newline-delimited-JSON commit files. This crate reconstructs a
//! consistent [`Snapshot`] of that log, plans a [`scan::Scan`] over it, and
//! yields batches of scan-file metadata that a host engine turns into actual
//! data reads. Soft-deleted rows are exposed through per-file deletion vectors
//! which resolve into boolean selection vectors.
//!
//! The kernel performs no columnar IO of its own. Everything that touches
//! storage goes through an [`Engine`]: a host-supplied capability set for
//! listing directories, reading files, and parsing JSON. A synchronous
//! local-filesystem engine is bundled behind the `default-engine` feature for
//! hosts (and tests) that do not bring their own.

use std::sync::Arc;

use bytes::Bytes;
use url::Url;

pub mod actions;
pub mod engine_data;
pub mod error;
pub mod expressions;
pub mod log_segment;
pub mod path;
pub mod scan;
pub mod schema;
pub mod snapshot;

pub mod engine;

pub use engine_data::EngineData;
pub use error::{Error, SlateResult};
pub use snapshot::Snapshot;

/// A table log version. Commit `N` lives at `_slate_log/{N:020}.json`.
pub type Version = u64;

/// Metadata about a file returned from a storage listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    /// Fully qualified location of the file
    pub location: Url,
    /// Last modification time, in milliseconds since the unix epoch
    pub last_modified: i64,
    /// Size of the file in bytes
    pub size: usize,
}

/// Interface for listing directories and reading raw file bytes. The kernel
/// never retries; transient-failure policy belongs to the implementation.
pub trait StorageHandler: Send + Sync {
    /// List the files directly under `url`, in a stable order.
    fn list_from(&self, url: &Url) -> SlateResult<Vec<FileMeta>>;

    /// Read the full contents of the file at `url`.
    fn read(&self, url: &Url) -> SlateResult<Bytes>;
}

/// Interface for parsing newline-delimited JSON.
pub trait JsonHandler: Send + Sync {
    /// Parse `data` as newline-delimited JSON, one value per non-empty line.
    fn parse_json_lines(&self, data: &[u8]) -> SlateResult<Vec<serde_json::Value>>;
}

/// The host-supplied capability set the kernel calls back into. Implementations
/// must be safely shareable: one engine may back many snapshots and scans.
pub trait Engine: Send + Sync {
    fn storage_handler(&self) -> Arc<dyn StorageHandler>;
    fn json_handler(&self) -> Arc<dyn JsonHandler>;
}
