//! Deletion vector descriptors and bitmap resolution.
//!
//! A deletion vector is a roaring bitmap of row indexes that are logically
//! deleted from one data file. The descriptor in the log says where the bitmap
//! lives: inline in the log itself, in a relative file whose name derives from
//! a z85-encoded UUID, or at an absolute path.

use std::io::ErrorKind;

use roaring::RoaringTreemap;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, SlateResult, StorageHandler};

/// Marker bytes preceding every serialized bitmap.
pub const DV_MAGIC: u32 = 1681511377;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionVectorDescriptor {
    /// "u" (relative, UUID-derived path), "i" (inline), or "p" (absolute path).
    pub storage_type: String,
    pub path_or_inline_dv: String,
    /// Byte offset of the bitmap within its file. Never set for inline vectors.
    pub offset: Option<i32>,
    /// Length in bytes of the serialized bitmap, excluding the magic.
    pub size_in_bytes: i32,
    /// Number of rows the bitmap deletes.
    pub cardinality: i64,
}

impl DeletionVectorDescriptor {
    /// Identity of this vector for log-replay dedup. Two file versions with
    /// different vectors must compare unequal.
    pub fn unique_id(&self) -> String {
        match self.offset {
            Some(offset) => format!("{}{}@{offset}", self.storage_type, self.path_or_inline_dv),
            None => format!("{}{}", self.storage_type, self.path_or_inline_dv),
        }
    }

    /// Where the bitmap is stored, or `None` for inline vectors.
    pub fn absolute_path(&self, parent: &Url) -> SlateResult<Option<Url>> {
        match self.storage_type.as_str() {
            "u" => {
                let dv_suffix = &self.path_or_inline_dv;
                if dv_suffix.len() < 20 {
                    return Err(Error::malformed_dv(format!(
                        "relative path '{dv_suffix}' is too short to hold an encoded UUID"
                    )));
                }
                let (prefix, encoded_uuid) = dv_suffix.split_at(dv_suffix.len() - 20);
                let uuid_bytes = z85::decode(encoded_uuid)
                    .map_err(|e| Error::malformed_dv(format!("undecodable UUID: {e}")))?;
                let uuid = uuid::Uuid::from_slice(&uuid_bytes)
                    .map_err(|e| Error::malformed_dv(format!("bad UUID bytes: {e}")))?;
                let path = if prefix.is_empty() {
                    format!("deletion_vector_{uuid}.bin")
                } else {
                    format!("{prefix}/deletion_vector_{uuid}.bin")
                };
                Ok(Some(parent.join(&path)?))
            }
            "p" => Ok(Some(Url::parse(&self.path_or_inline_dv)?)),
            "i" => Ok(None),
            other => Err(Error::malformed_dv(format!(
                "unrecognized storage type '{other}'"
            ))),
        }
    }

    /// Fetch and decode the bitmap this descriptor references.
    pub fn read(
        &self,
        storage: &dyn StorageHandler,
        parent: &Url,
    ) -> SlateResult<RoaringTreemap> {
        match self.absolute_path(parent)? {
            None => {
                if self.offset.is_some() {
                    return Err(Error::malformed_dv("inline vector carries an offset"));
                }
                let bytes = z85::decode(&self.path_or_inline_dv)
                    .map_err(|e| Error::malformed_dv(format!("undecodable inline data: {e}")))?;
                self.parse_bitmap(&bytes, 0)
            }
            Some(url) => {
                let bytes = storage.read(&url).map_err(|err| match err {
                    Error::IoFailure(ioe) if ioe.kind() == ErrorKind::NotFound => {
                        Error::DeletionVectorNotFound(url.to_string())
                    }
                    other => other,
                })?;
                let offset = self.offset.unwrap_or(0);
                if offset < 0 {
                    return Err(Error::malformed_dv(format!("negative offset {offset}")));
                }
                self.parse_bitmap(&bytes, offset as usize)
            }
        }
    }

    fn parse_bitmap(&self, bytes: &[u8], start: usize) -> SlateResult<RoaringTreemap> {
        let size = self.size_in_bytes as usize;
        let end = start
            .checked_add(4)
            .and_then(|s| s.checked_add(size))
            .ok_or_else(|| Error::malformed_dv("offset overflow"))?;
        if bytes.len() < end {
            return Err(Error::malformed_dv(format!(
                "payload is {} bytes but descriptor needs {end}",
                bytes.len()
            )));
        }
        let magic = u32::from_le_bytes(bytes[start..start + 4].try_into().unwrap());
        if magic != DV_MAGIC {
            return Err(Error::malformed_dv(format!(
                "unrecognized format tag {magic:#010x}"
            )));
        }
        let bitmap = RoaringTreemap::deserialize_from(&bytes[start + 4..end])
            .map_err(|e| Error::malformed_dv(format!("undecodable bitmap: {e}")))?;
        if bitmap.len() != self.cardinality as u64 {
            return Err(Error::malformed_dv(format!(
                "bitmap deletes {} rows but descriptor declares {}",
                bitmap.len(),
                self.cardinality
            )));
        }
        Ok(bitmap)
    }
}

/// Expand a deletion bitmap into an inclusion-semantics selection vector of
/// exactly `row_count` entries: deleted rows become `false`.
pub fn deletion_treemap_to_selection_vector(
    bitmap: &RoaringTreemap,
    row_count: u64,
) -> SlateResult<Vec<bool>> {
    if let Some(max) = bitmap.max() {
        if max >= row_count {
            return Err(Error::malformed_dv(format!(
                "bitmap deletes row {max} but the file only has {row_count} rows"
            )));
        }
    }
    let mut selection = vec![true; row_count as usize];
    for row in bitmap.iter() {
        selection[row as usize] = false;
    }
    Ok(selection)
}

/// Serialize `deleted_rows` into the on-disk layout (magic then portable
/// bitmap, zero-padded to a 4-byte multiple so it can also be z85-inlined).
/// Returns the payload and the declared `sizeInBytes`.
pub fn serialize_deletion_bitmap(deleted_rows: &[u64]) -> (Vec<u8>, i32) {
    let bitmap: RoaringTreemap = deleted_rows.iter().copied().collect();
    let mut payload = DV_MAGIC.to_le_bytes().to_vec();
    bitmap
        .serialize_into(&mut payload)
        .expect("serializing into a Vec cannot fail");
    let size_in_bytes = (payload.len() - 4) as i32;
    while payload.len() % 4 != 0 {
        payload.push(0);
    }
    (payload, size_in_bytes)
}
