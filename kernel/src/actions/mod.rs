//! Action types recorded in the transaction log.
//!
//! Each commit file is newline-delimited JSON; every line is a single-key
//! object naming the action it carries, e.g. `{"add": {...}}`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{Error, SlateResult};

pub mod deletion_vector;

pub use deletion_vector::DeletionVectorDescriptor;

/// Reader feature names this kernel understands for protocol version 3.
pub const SUPPORTED_READER_FEATURES: &[&str] = &["deletionVectors"];

/// Highest `minReaderVersion` this kernel implements.
pub const MAX_READER_VERSION: i32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Format {
    pub provider: String,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Unique table identifier.
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub format: Format,
    /// JSON-serialized table schema; see [`crate::schema::StructType::try_from_json`].
    pub schema_string: String,
    pub partition_columns: Vec<String>,
    pub created_time: Option<i64>,
    #[serde(default)]
    pub configuration: HashMap<String, String>,
}

impl Metadata {
    pub fn parse_schema(&self) -> SlateResult<crate::schema::StructType> {
        crate::schema::StructType::try_from_json(&self.schema_string)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Protocol {
    pub min_reader_version: i32,
    pub min_writer_version: i32,
    pub reader_features: Option<Vec<String>>,
    pub writer_features: Option<Vec<String>>,
}

impl Protocol {
    /// Fail unless this kernel can correctly read a table with this protocol.
    pub fn ensure_read_supported(&self) -> SlateResult<()> {
        if self.min_reader_version > MAX_READER_VERSION {
            return Err(Error::unsupported_protocol(format!(
                "minReaderVersion {} exceeds supported version {MAX_READER_VERSION}",
                self.min_reader_version
            )));
        }
        if self.min_reader_version == MAX_READER_VERSION {
            let unsupported: Vec<_> = self
                .reader_features
                .iter()
                .flatten()
                .filter(|f| !SUPPORTED_READER_FEATURES.contains(&f.as_str()))
                .collect();
            if !unsupported.is_empty() {
                return Err(Error::unsupported_protocol(format!(
                    "unsupported reader features: {unsupported:?}"
                )));
            }
        }
        Ok(())
    }
}

/// Per-file statistics. Unlike the stats-as-embedded-string convention some
/// formats use, slate records these as a plain JSON object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    /// Logical row count of the file, before deletion-vector filtering.
    pub num_records: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Add {
    /// Path of the data file, relative to the table root (or absolute).
    pub path: String,
    #[serde(default)]
    pub partition_values: HashMap<String, String>,
    pub size: i64,
    #[serde(default)]
    pub modification_time: i64,
    pub data_change: bool,
    pub stats: Option<Stats>,
    pub tags: Option<HashMap<String, String>>,
    pub deletion_vector: Option<DeletionVectorDescriptor>,
}

impl Add {
    pub fn num_records(&self) -> Option<u64> {
        self.stats.map(|s| s.num_records as u64)
    }

    /// The deletion-vector identity of this file version, if any. Two adds for
    /// the same path with different deletion vectors are distinct file versions.
    pub fn dv_unique_id(&self) -> Option<String> {
        self.deletion_vector.as_ref().map(|dv| dv.unique_id())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Remove {
    pub path: String,
    pub deletion_timestamp: Option<i64>,
    pub data_change: bool,
    #[serde(default)]
    pub partition_values: HashMap<String, String>,
    pub size: Option<i64>,
    pub deletion_vector: Option<DeletionVectorDescriptor>,
}

impl Remove {
    pub fn dv_unique_id(&self) -> Option<String> {
        self.deletion_vector.as_ref().map(|dv| dv.unique_id())
    }
}

/// One line of a commit file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    MetaData(Metadata),
    Protocol(Protocol),
    Add(Add),
    Remove(Remove),
    // Carried but not interpreted by this kernel.
    CommitInfo(serde_json::Value),
    Txn(serde_json::Value),
    DomainMetadata(serde_json::Value),
}

impl Action {
    /// Parse a commit line. Callers wrap failures with the commit they were
    /// reading so corruption reports name the offending file.
    pub fn try_from_json(value: serde_json::Value) -> SlateResult<Self> {
        serde_json::from_value(value).map_err(Error::MalformedJson)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_metadata_action() {
        let line = r#"{"metaData":{"id":"aff5cb91-8cd9-4195-aef9-446908507302","format":{"provider":"parquet","options":{}},"schemaString":"{\"type\":\"struct\",\"fields\":[{\"name\":\"c1\",\"type\":\"integer\",\"nullable\":true,\"metadata\":{}}]}","partitionColumns":["c1"],"configuration":{},"createdTime":1670892997849,"name":null,"description":null}}"#;
        let action = Action::try_from_json(serde_json::from_str(line).unwrap()).unwrap();
        let Action::MetaData(metadata) = action else {
            panic!("expected metaData");
        };
        assert_eq!(metadata.id, "aff5cb91-8cd9-4195-aef9-446908507302");
        assert_eq!(metadata.created_time, Some(1670892997849));
        assert_eq!(metadata.partition_columns, vec!["c1"]);
        assert_eq!(metadata.parse_schema().unwrap().len(), 1);
    }

    #[test]
    fn parse_add_with_deletion_vector() {
        let line = serde_json::json!({
            "add": {
                "path": "part-00000.parquet",
                "partitionValues": {"c1": "4"},
                "size": 452,
                "modificationTime": 1670892998135i64,
                "dataChange": true,
                "stats": {"numRecords": 6},
                "tags": null,
                "deletionVector": {
                    "storageType": "u",
                    "pathOrInlineDv": "vBn[lx{q8@P<9BNH/isA",
                    "offset": 1,
                    "sizeInBytes": 36,
                    "cardinality": 2
                }
            }
        });
        let Action::Add(add) = Action::try_from_json(line).unwrap() else {
            panic!("expected add");
        };
        assert_eq!(add.num_records(), Some(6));
        assert_eq!(
            add.dv_unique_id().unwrap(),
            "uvBn[lx{q8@P<9BNH/isA@1"
        );
    }

    #[test]
    fn unknown_action_is_rejected() {
        let line = serde_json::json!({"mystery": {"path": "x"}});
        assert!(matches!(
            Action::try_from_json(line),
            Err(Error::MalformedJson(_))
        ));
    }

    #[test]
    fn protocol_gating() {
        let ok = Protocol {
            min_reader_version: 3,
            min_writer_version: 7,
            reader_features: Some(vec!["deletionVectors".to_string()]),
            writer_features: Some(vec!["deletionVectors".to_string()]),
        };
        ok.ensure_read_supported().unwrap();

        let future = Protocol {
            min_reader_version: 4,
            ..ok.clone()
        };
        assert!(matches!(
            future.ensure_read_supported(),
            Err(Error::UnsupportedProtocol(_))
        ));

        let feature = Protocol {
            reader_features: Some(vec!["columnMapping".to_string()]),
            ..ok
        };
        assert!(matches!(
            feature.ensure_read_supported(),
            Err(Error::UnsupportedProtocol(_))
        ));
    }
}
