//! Listing and validation of the transaction log.

use itertools::Itertools;
use tracing::warn;
use url::Url;

use crate::path::{ParsedLogPath, LOG_DIR_NAME};
use crate::{Error, SlateResult, StorageHandler, Version};

/// The contiguous run of commit files backing one snapshot.
///
/// Commits are held in ascending version order; replay consumers walk them in
/// reverse so newer actions win.
#[derive(Debug, Clone)]
pub struct LogSegment {
    pub log_root: Url,
    pub commit_files: Vec<ParsedLogPath>,
}

impl LogSegment {
    /// List the log under `table_root` and validate it, optionally pinned to
    /// `requested_version`.
    pub fn try_new(
        table_root: &Url,
        storage: &dyn StorageHandler,
        requested_version: Option<Version>,
    ) -> SlateResult<Self> {
        let log_root = table_root.join(&format!("{LOG_DIR_NAME}/"))?;
        let listing = storage.list_from(&log_root).map_err(|err| match err {
            Error::IoFailure(ioe) if ioe.kind() == std::io::ErrorKind::NotFound => {
                Error::TableNotFound(table_root.to_string())
            }
            other => other,
        })?;

        let commit_files = listing
            .iter()
            .filter_map(|meta| {
                let parsed = ParsedLogPath::try_from_meta(meta);
                if parsed.is_none() {
                    warn!("ignoring unrecognized log file {}", meta.location);
                }
                parsed
            })
            .collect_vec();

        Self::try_from_listing(log_root, commit_files, requested_version)
    }

    /// Validate an already-listed set of commit files. Split out so corruption
    /// cases that cannot occur through a well-behaved filesystem listing are
    /// still checked and testable.
    pub fn try_from_listing(
        log_root: Url,
        mut commit_files: Vec<ParsedLogPath>,
        requested_version: Option<Version>,
    ) -> SlateResult<Self> {
        commit_files.sort_by_key(|f| f.version);

        if let Some(requested) = requested_version {
            commit_files.retain(|f| f.version <= requested);
        }
        if commit_files.is_empty() {
            return match requested_version {
                Some(v) => Err(Error::VersionNotFound(v)),
                None => Err(Error::TableNotFound(log_root.to_string())),
            };
        }

        for (a, b) in commit_files.iter().tuple_windows() {
            if a.version == b.version {
                return Err(Error::corrupt_log(format!(
                    "two log entries claim version {}",
                    a.version
                )));
            }
            if b.version != a.version + 1 {
                return Err(Error::corrupt_log(format!(
                    "log jumps from version {} to {}",
                    a.version, b.version
                )));
            }
        }
        if commit_files[0].version != 0 {
            return Err(Error::corrupt_log(format!(
                "log starts at version {} instead of 0",
                commit_files[0].version
            )));
        }

        let head = commit_files.last().expect("non-empty").version;
        if let Some(requested) = requested_version {
            if head != requested {
                return Err(Error::VersionNotFound(requested));
            }
        }

        Ok(Self {
            log_root,
            commit_files,
        })
    }

    /// Version of the newest commit in this segment.
    pub fn end_version(&self) -> Version {
        self.commit_files.last().expect("validated non-empty").version
    }

    /// Read and parse one commit file. Unparsable content is corruption, and
    /// the report names the offending commit.
    pub fn read_commit(
        engine: &dyn crate::Engine,
        commit: &ParsedLogPath,
    ) -> SlateResult<Vec<crate::actions::Action>> {
        let bytes = engine.storage_handler().read(&commit.location)?;
        let lines = engine
            .json_handler()
            .parse_json_lines(&bytes)
            .map_err(|e| Error::corrupt_log(format!("{}: {e}", commit.location)))?;
        lines
            .into_iter()
            .map(|line| {
                crate::actions::Action::try_from_json(line)
                    .map_err(|e| Error::corrupt_log(format!("{}: {e}", commit.location)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(versions: &[Version]) -> Vec<ParsedLogPath> {
        versions
            .iter()
            .map(|v| ParsedLogPath {
                location: Url::parse(&format!(
                    "file:///t/_slate_log/{}",
                    crate::path::commit_filename(*v)
                ))
                .unwrap(),
                version: *v,
            })
            .collect()
    }

    fn log_root() -> Url {
        Url::parse("file:///t/_slate_log/").unwrap()
    }

    #[test]
    fn head_and_pinned_versions() {
        let segment = LogSegment::try_from_listing(log_root(), paths(&[0, 1, 2]), None).unwrap();
        assert_eq!(segment.end_version(), 2);

        let pinned =
            LogSegment::try_from_listing(log_root(), paths(&[0, 1, 2]), Some(1)).unwrap();
        assert_eq!(pinned.end_version(), 1);
        assert_eq!(pinned.commit_files.len(), 2);
    }

    #[test]
    fn requested_version_past_head() {
        assert!(matches!(
            LogSegment::try_from_listing(log_root(), paths(&[0, 1]), Some(5)),
            Err(Error::VersionNotFound(5))
        ));
    }

    #[test]
    fn duplicate_version_is_corrupt() {
        let mut files = paths(&[0, 1]);
        files.push(ParsedLogPath {
            location: Url::parse("file:///t/_slate_log/elsewhere/00000000000000000001.json")
                .unwrap(),
            version: 1,
        });
        assert!(matches!(
            LogSegment::try_from_listing(log_root(), files, None),
            Err(Error::CorruptLog(_))
        ));
    }

    #[test]
    fn gapped_or_headless_log_is_corrupt() {
        assert!(matches!(
            LogSegment::try_from_listing(log_root(), paths(&[0, 2]), None),
            Err(Error::CorruptLog(_))
        ));
        assert!(matches!(
            LogSegment::try_from_listing(log_root(), paths(&[1, 2]), None),
            Err(Error::CorruptLog(_))
        ));
    }

    #[test]
    fn empty_log_is_table_not_found() {
        assert!(matches!(
            LogSegment::try_from_listing(log_root(), vec![], None),
            Err(Error::TableNotFound(_))
        ));
    }
}
