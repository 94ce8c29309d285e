//! Parsing of transaction-log file names.

use url::Url;

use crate::{FileMeta, Version};

/// Name of the log directory under the table root.
pub const LOG_DIR_NAME: &str = "_slate_log";

/// A log file whose name was recognized as a commit: `{version:020}.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLogPath {
    pub location: Url,
    pub version: Version,
}

impl ParsedLogPath {
    /// Try to interpret a listed file as a commit. Returns `None` for files
    /// that are not commits (temp files, CRCs, unknown junk); the caller
    /// decides whether to warn.
    pub fn try_from_meta(meta: &FileMeta) -> Option<Self> {
        let filename = meta.location.path_segments()?.next_back()?;
        let version_part = filename.strip_suffix(".json")?;
        if version_part.len() != 20 || !version_part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let version = version_part.parse::<Version>().ok()?;
        Some(Self {
            location: meta.location.clone(),
            version,
        })
    }
}

/// The log file name for `version`.
pub fn commit_filename(version: Version) -> String {
    format!("{version:020}.json")
}
