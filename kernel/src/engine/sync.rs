//! A synchronous local-filesystem engine.
//!
//! Serves `file://` tables only; hosts with object stores or async runtimes
//! bring their own [`Engine`]. All calls block on std IO.

use std::fs;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use bytes::Bytes;
use tracing::debug;
use url::Url;

use crate::{Engine, Error, FileMeta, JsonHandler, SlateResult, StorageHandler};

#[derive(Debug)]
pub struct SyncStorageHandler;

fn to_file_path(url: &Url) -> SlateResult<std::path::PathBuf> {
    url.to_file_path()
        .map_err(|_| Error::InvalidTableLocation(format!("not a local path: {url}")))
}

impl StorageHandler for SyncStorageHandler {
    fn list_from(&self, url: &Url) -> SlateResult<Vec<FileMeta>> {
        let dir = to_file_path(url)?;
        debug!("listing {}", dir.display());
        let mut files = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let last_modified = meta
                .modified()?
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            let location = Url::from_file_path(entry.path())
                .map_err(|_| Error::generic("listed path is not a valid url"))?;
            files.push(FileMeta {
                location,
                last_modified,
                size: meta.len() as usize,
            });
        }
        // read_dir order is platform-dependent; listings must be stable
        files.sort_by(|a, b| a.location.cmp(&b.location));
        Ok(files)
    }

    fn read(&self, url: &Url) -> SlateResult<Bytes> {
        let path = to_file_path(url)?;
        debug!("reading {}", path.display());
        Ok(Bytes::from(fs::read(path)?))
    }
}

#[derive(Debug)]
pub struct SyncJsonHandler;

impl JsonHandler for SyncJsonHandler {
    fn parse_json_lines(&self, data: &[u8]) -> SlateResult<Vec<serde_json::Value>> {
        data.split(|b| *b == b'\n')
            .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
            .map(|line| serde_json::from_slice(line).map_err(Error::MalformedJson))
            .collect()
    }
}

/// The default engine: local filesystem storage plus serde-backed JSON.
pub struct SyncEngine {
    storage: Arc<SyncStorageHandler>,
    json: Arc<SyncJsonHandler>,
}

impl SyncEngine {
    pub fn new() -> Self {
        Self {
            storage: Arc::new(SyncStorageHandler),
            json: Arc::new(SyncJsonHandler),
        }
    }

    /// Validate that this engine can serve `table_root` at all: it must be a
    /// reachable local directory.
    pub fn probe(&self, table_root: &Url) -> SlateResult<()> {
        if table_root.scheme() != "file" {
            return Err(Error::InvalidTableLocation(format!(
                "unsupported scheme '{}'",
                table_root.scheme()
            )));
        }
        let dir = to_file_path(table_root)?;
        if !dir.is_dir() {
            return Err(Error::InvalidTableLocation(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
        Ok(())
    }
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for SyncEngine {
    fn storage_handler(&self) -> Arc<dyn StorageHandler> {
        self.storage.clone()
    }

    fn json_handler(&self) -> Arc<dyn JsonHandler> {
        self.json.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_json_lines_skips_blank_lines() {
        let handler = SyncJsonHandler;
        let values = handler
            .parse_json_lines(b"{\"a\":1}\n\n{\"b\":2}\n")
            .unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[1]["b"], 2);
    }

    #[test]
    fn parse_json_lines_rejects_garbage() {
        let handler = SyncJsonHandler;
        assert!(matches!(
            handler.parse_json_lines(b"{\"a\":1}\nnot json\n"),
            Err(Error::MalformedJson(_))
        ));
    }

    #[test]
    fn probe_rejects_foreign_schemes() {
        let engine = SyncEngine::new();
        let url = Url::parse("s3://bucket/table/").unwrap();
        assert!(matches!(
            engine.probe(&url),
            Err(Error::InvalidTableLocation(_))
        ));
    }
}
