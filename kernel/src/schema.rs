//! Table schema types, deserializable from the `schemaString` carried by the
//! log's `metaData` action.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{Error, SlateResult};

pub type Schema = StructType;
pub type SchemaRef = Arc<StructType>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    String,
    Long,
    Integer,
    Short,
    Byte,
    Float,
    Double,
    Boolean,
    Binary,
    Date,
    Timestamp,
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrimitiveType::String => "string",
            PrimitiveType::Long => "long",
            PrimitiveType::Integer => "integer",
            PrimitiveType::Short => "short",
            PrimitiveType::Byte => "byte",
            PrimitiveType::Float => "float",
            PrimitiveType::Double => "double",
            PrimitiveType::Boolean => "boolean",
            PrimitiveType::Binary => "binary",
            PrimitiveType::Date => "date",
            PrimitiveType::Timestamp => "timestamp",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataType {
    Primitive(PrimitiveType),
    Struct(Box<StructType>),
    Array(Box<ArrayType>),
    Map(Box<MapType>),
}

impl DataType {
    pub const STRING: DataType = DataType::Primitive(PrimitiveType::String);
    pub const LONG: DataType = DataType::Primitive(PrimitiveType::Long);
    pub const INTEGER: DataType = DataType::Primitive(PrimitiveType::Integer);
    pub const BOOLEAN: DataType = DataType::Primitive(PrimitiveType::Boolean);
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Primitive(p) => write!(f, "{p}"),
            DataType::Struct(_) => write!(f, "struct"),
            DataType::Array(a) => write!(f, "array<{}>", a.element_type),
            DataType::Map(m) => write!(f, "map<{}, {}>", m.key_type, m.value_type),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayType {
    #[serde(rename = "type")]
    type_name: String,
    pub element_type: DataType,
    pub contains_null: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapType {
    #[serde(rename = "type")]
    type_name: String,
    pub key_type: DataType,
    pub value_type: DataType,
    pub value_contains_null: bool,
}

/// A single named field within a [`StructType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructField {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    pub nullable: bool,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl StructField {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
            metadata: HashMap::new(),
        }
    }

    pub fn nullable(name: impl Into<String>, data_type: DataType) -> Self {
        Self::new(name, data_type, true)
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }
}

/// An ordered collection of named fields; the root of every table schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructType {
    #[serde(rename = "type")]
    type_name: String,
    fields: Vec<StructField>,
}

impl StructType {
    pub fn new(fields: impl IntoIterator<Item = StructField>) -> Self {
        Self {
            type_name: "struct".to_string(),
            fields: fields.into_iter().collect(),
        }
    }

    /// Parse a schema from the JSON `schemaString` representation.
    pub fn try_from_json(schema_string: &str) -> SlateResult<Self> {
        let parsed: StructType = serde_json::from_str(schema_string)
            .map_err(|e| Error::corrupt_log(format!("unparsable schema string: {e}")))?;
        if parsed.type_name != "struct" {
            return Err(Error::corrupt_log(format!(
                "schema root must be a struct, got '{}'",
                parsed.type_name
            )));
        }
        Ok(parsed)
    }

    pub fn fields(&self) -> impl Iterator<Item = &StructField> {
        self.fields.iter()
    }

    pub fn field(&self, name: &str) -> Option<&StructField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Build the sub-schema selecting `columns`, in the order given. Fails if
    /// any requested column is not part of this schema.
    pub fn project(&self, columns: &[impl AsRef<str>]) -> SlateResult<StructType> {
        let fields = columns
            .iter()
            .map(|name| {
                self.field(name.as_ref()).cloned().ok_or_else(|| {
                    Error::invalid_projection(format!(
                        "column '{}' does not exist in the table schema",
                        name.as_ref()
                    ))
                })
            })
            .collect::<SlateResult<Vec<_>>>()?;
        Ok(StructType::new(fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA_STRING: &str = r#"{"type":"struct","fields":[{"name":"c1","type":"integer","nullable":true,"metadata":{}},{"name":"c2","type":"string","nullable":false,"metadata":{}}]}"#;

    #[test]
    fn parse_schema_string() {
        let schema = StructType::try_from_json(SCHEMA_STRING).unwrap();
        assert_eq!(schema.len(), 2);
        assert_eq!(schema.field("c1").unwrap().data_type, DataType::INTEGER);
        assert!(!schema.field("c2").unwrap().is_nullable());
        assert!(schema.field("c3").is_none());
    }

    #[test]
    fn parse_nested_types() {
        let json = r#"{"type":"struct","fields":[
            {"name":"tags","type":{"type":"map","keyType":"string","valueType":"string","valueContainsNull":true},"nullable":true,"metadata":{}},
            {"name":"ids","type":{"type":"array","elementType":"long","containsNull":false},"nullable":true,"metadata":{}},
            {"name":"point","type":{"type":"struct","fields":[{"name":"x","type":"double","nullable":false,"metadata":{}}]},"nullable":true,"metadata":{}}
        ]}"#;
        let schema = StructType::try_from_json(json).unwrap();
        assert!(matches!(
            schema.field("tags").unwrap().data_type,
            DataType::Map(_)
        ));
        assert!(matches!(
            schema.field("ids").unwrap().data_type,
            DataType::Array(_)
        ));
        assert!(matches!(
            schema.field("point").unwrap().data_type,
            DataType::Struct(_)
        ));
    }

    #[test]
    fn project_unknown_column_fails() {
        let schema = StructType::try_from_json(SCHEMA_STRING).unwrap();
        let projected = schema.project(&["c2"]).unwrap();
        assert_eq!(projected.len(), 1);
        assert!(matches!(
            schema.project(&["c1", "nope"]),
            Err(Error::InvalidProjection(_))
        ));
    }

    #[test]
    fn non_struct_root_fails() {
        assert!(matches!(
            StructType::try_from_json(r#"{"type":"array","fields":[]}"#),
            Err(Error::CorruptLog(_))
        ));
    }
}
