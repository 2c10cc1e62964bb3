//! Document codec trait and document metadata.

use crate::error::{Result, SearchError};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::fmt;

/// A document as the cluster stores it: field name to value.
pub type Fields = serde_json::Map<String, Value>;

/// Conversion between a record type and a stored field map.
///
/// The default methods go through `serde`, so most record types only need
/// an empty impl. Override them to map fields by hand.
///
/// # Example
///
/// ```rust
/// use quarry_search::Document;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct CarOrder {
///     price: u64,
///     color: String,
///     make: String,
/// }
///
/// impl Document for CarOrder {}
/// ```
pub trait Document: Serialize + DeserializeOwned + Send + Sync {
    /// Encode as a field map.
    fn to_fields(&self) -> Result<Fields> {
        match serde_json::to_value(self)? {
            Value::Object(fields) => Ok(fields),
            other => Err(SearchError::invalid(format!(
                "document must encode to an object, found {}",
                type_name(&other)
            ))),
        }
    }

    /// Decode from a field map.
    fn from_fields(fields: Fields) -> Result<Self> {
        serde_json::from_value(Value::Object(fields))
            .map_err(|e| SearchError::malformed(format!("document does not decode: {}", e)))
    }
}

impl Document for Fields {
    fn to_fields(&self) -> Result<Fields> {
        Ok(self.clone())
    }

    fn from_fields(fields: Fields) -> Result<Self> {
        Ok(fields)
    }
}

/// Decode a `_source` value.
pub(crate) fn decode_source<T: Document>(source: &Value) -> Result<T> {
    match source {
        Value::Object(fields) => T::from_fields(fields.clone()),
        other => Err(SearchError::malformed(format!(
            "_source must be an object, found {}",
            type_name(other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Identifies one revision of a stored document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionToken {
    /// Sequence number.
    pub seq_no: i64,
    /// Primary term.
    pub primary_term: i64,
}

impl VersionToken {
    /// Create a version token.
    pub fn new(seq_no: i64, primary_term: i64) -> Self {
        Self {
            seq_no,
            primary_term,
        }
    }

    /// Read `_seq_no` and `_primary_term` from a reply object.
    pub(crate) fn from_json(value: &Value) -> Option<Self> {
        Some(Self {
            seq_no: value.get("_seq_no")?.as_i64()?,
            primary_term: value.get("_primary_term")?.as_i64()?,
        })
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.seq_no, self.primary_term)
    }
}

/// Document metadata returned from search results.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentMeta {
    /// Document ID.
    pub id: String,
    /// Index name.
    pub index: String,
    /// Document score (relevance).
    pub score: Option<f64>,
    /// Document version.
    pub version: Option<i64>,
    /// Version token, when the cluster returned one.
    pub version_token: Option<VersionToken>,
    /// Sort values.
    pub sort: Vec<Value>,
}

impl DocumentMeta {
    pub(crate) fn from_json(hit: &Value) -> Result<Self> {
        let id = hit
            .get("_id")
            .and_then(Value::as_str)
            .ok_or_else(|| SearchError::malformed("hit without _id"))?;

        Ok(Self {
            id: id.to_string(),
            index: hit["_index"].as_str().unwrap_or_default().to_string(),
            score: hit["_score"].as_f64(),
            version: hit["_version"].as_i64(),
            version_token: VersionToken::from_json(hit),
            sort: hit["sort"].as_array().cloned().unwrap_or_default(),
        })
    }
}

/// A document with its metadata.
#[derive(Debug, Clone)]
pub struct Hit<T> {
    /// The document data.
    pub doc: T,
    /// Document metadata.
    pub meta: DocumentMeta,
}

/// A document to be written.
#[derive(Debug, Clone)]
pub struct MutationRecord<T> {
    /// Target index.
    pub index: String,
    /// Document id. The cluster assigns one when absent.
    pub id: Option<String>,
    /// Document body.
    pub body: T,
    /// Expected current revision.
    pub expected_version: Option<VersionToken>,
}

impl<T: Document> MutationRecord<T> {
    /// Create a record with a server-assigned id.
    pub fn new(index: impl Into<String>, body: T) -> Self {
        Self {
            index: index.into(),
            id: None,
            body,
            expected_version: None,
        }
    }

    /// Set the document id.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Only write if the stored document is at `token`.
    pub fn expected_version(mut self, token: VersionToken) -> Self {
        self.expected_version = Some(token);
        self
    }
}
