//! The user-defined field schema: which fields to extract and what they mean.
//!
//! A schema is supplied once per request and never changes during it. Field
//! order is preserved from the source (JSON object order or insertion order)
//! so prompts and printed tables list fields the way the caller wrote them.

use crate::error::ExtractError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;

/// One field to extract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub description: String,
}

/// Ordered mapping of field name → human-readable description.
///
/// # Example
/// ```rust
/// use edgequake_extract::FieldSchema;
///
/// let schema = FieldSchema::from_json_str(
///     r#"{"invoice_id": "Invoice number", "total": "Total amount due"}"#,
/// ).unwrap();
/// assert_eq!(schema.len(), 2);
/// assert_eq!(schema.names().next(), Some("invoice_id"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSchema {
    fields: Vec<FieldSpec>,
}

impl FieldSchema {
    /// Build a schema from `(name, description)` pairs.
    ///
    /// Names are trimmed; empty and duplicate names are rejected. An empty
    /// schema is rejected as well, since there would be nothing to extract.
    pub fn new<I, K, V>(pairs: I) -> Result<Self, ExtractError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut fields: Vec<FieldSpec> = Vec::new();
        for (name, description) in pairs {
            let name = name.into().trim().to_string();
            if name.is_empty() {
                return Err(ExtractError::InvalidSchema(
                    "field names must not be empty".into(),
                ));
            }
            if fields.iter().any(|f| f.name == name) {
                return Err(ExtractError::InvalidSchema(format!(
                    "duplicate field '{name}'"
                )));
            }
            fields.push(FieldSpec {
                name,
                description: description.into(),
            });
        }
        if fields.is_empty() {
            return Err(ExtractError::InvalidSchema(
                "at least one field is required".into(),
            ));
        }
        Ok(Self { fields })
    }

    /// Parse a JSON object `{"field": "description", ...}`.
    ///
    /// Non-string descriptions are rendered as JSON text rather than rejected.
    pub fn from_json_str(json: &str) -> Result<Self, ExtractError> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| ExtractError::InvalidSchema(format!("not valid JSON: {e}")))?;
        Self::from_json_value(&value)
    }

    /// Build a schema from an already-decoded JSON value.
    pub fn from_json_value(value: &serde_json::Value) -> Result<Self, ExtractError> {
        let obj = value
            .as_object()
            .ok_or_else(|| ExtractError::InvalidSchema("must be a JSON object".into()))?;
        Self::new(obj.iter().map(|(name, desc)| {
            let description = match desc {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (name.clone(), description)
        }))
    }

    /// Read a schema from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ExtractError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ExtractError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter()
    }

    /// Field names in schema order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn description(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.description.as_str())
    }
}

impl Serialize for FieldSchema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for f in &self.fields {
            map.serialize_entry(&f.name, &f.description)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FieldSchema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        FieldSchema::from_json_value(&value).map_err(serde::de::Error::custom)
    }
}
