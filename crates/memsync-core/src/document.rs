//! Document types and operations

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Maximum document ID length in bytes
pub const MAX_ID_LEN: usize = 512;

/// Document identifier - UTF-8 string, max 512 bytes
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentId(String);

impl DocumentId {
    /// Create a new document ID, validating the format
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();

        if id.is_empty() {
            return Err(Error::InvalidDocumentId("Document ID cannot be empty".into()));
        }

        if id.len() > MAX_ID_LEN {
            return Err(Error::InvalidDocumentId("Document ID exceeds 512 bytes".into()));
        }

        if id.chars().any(char::is_control) {
            return Err(Error::InvalidDocumentId(
                "Document ID must not contain control characters".into(),
            ));
        }

        Ok(Self(id))
    }

    /// Generate a fresh random ID for a brand-new document
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for DocumentId {
    type Error = Error;

    fn try_from(id: String) -> Result<Self> {
        Self::new(id)
    }
}

impl From<DocumentId> for String {
    fn from(id: DocumentId) -> Self {
        id.0
    }
}

/// Opaque revision marker assigned by the backing store.
///
/// Revisions are only ever compared for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    pub fn new(rev: impl Into<String>) -> Self {
        Self(rev.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Revision {
    fn from(rev: &str) -> Self {
        Self(rev.to_string())
    }
}

impl From<String> for Revision {
    fn from(rev: String) -> Self {
        Self(rev)
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// A document as exchanged with the backing store.
///
/// `_id`, `_rev` and `_deleted` are the only fields the store interprets;
/// everything else is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    id: DocumentId,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    rev: Option<Revision>,
    #[serde(rename = "_deleted", default, skip_serializing_if = "is_false")]
    deleted: bool,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl Document {
    /// Create an empty document with the given ID
    pub fn new(id: DocumentId) -> Self {
        Self {
            id,
            rev: None,
            deleted: false,
            fields: Map::new(),
        }
    }

    /// Create a deletion tombstone for the given ID and revision
    pub fn tombstone(id: DocumentId, rev: Option<Revision>) -> Self {
        Self {
            id,
            rev,
            deleted: true,
            fields: Map::new(),
        }
    }

    /// Parse a JSON object into a document. The object must carry an `_id`.
    pub fn from_json(value: Value) -> Result<Self> {
        match &value {
            Value::Object(obj) if obj.contains_key("_id") => {}
            Value::Object(_) => {
                return Err(Error::InvalidDocument("Document has no _id".into()));
            }
            other => {
                return Err(Error::InvalidDocument(format!(
                    "Expected a JSON object, got {}",
                    json_kind(other)
                )));
            }
        }

        serde_json::from_value(value).map_err(|e| Error::InvalidDocument(e.to_string()))
    }

    /// Parse a JSON object into a new document, generating an `_id` if absent
    pub fn from_json_or_generate(mut value: Value) -> Result<Self> {
        if let Value::Object(obj) = &mut value {
            if !obj.contains_key("_id") {
                let id = DocumentId::generate();
                obj.insert("_id".into(), Value::String(id.into()));
            }
        }
        Self::from_json(value)
    }

    /// Serialize back into a JSON object
    pub fn to_json(&self) -> Value {
        let mut obj = self.fields.clone();
        obj.insert("_id".into(), Value::String(self.id.to_string()));
        if let Some(rev) = &self.rev {
            obj.insert("_rev".into(), Value::String(rev.to_string()));
        }
        if self.deleted {
            obj.insert("_deleted".into(), Value::Bool(true));
        }
        Value::Object(obj)
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_rev(mut self, rev: impl Into<Revision>) -> Self {
        self.rev = Some(rev.into());
        self
    }

    pub fn with_deleted(mut self, deleted: bool) -> Self {
        self.deleted = deleted;
        self
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    pub fn rev(&self) -> Option<&Revision> {
        self.rev.as_ref()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Get a free-form field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn set_rev(&mut self, rev: Option<Revision>) {
        self.rev = rev;
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
