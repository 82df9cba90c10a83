use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Originating path of a loaded document.
pub const META_SOURCE: &str = "source";
/// Base name of the originating file.
pub const META_FILENAME: &str = "filename";
pub const META_FILE_TYPE: &str = "file_type";
/// 1-based page for documents extracted from paged formats.
pub const META_PAGE_NUMBER: &str = "page_number";
/// Id of the document a chunk was split from.
pub const META_SOURCE_ID: &str = "source_id";
pub const META_SPLIT_ID: &str = "split_id";
pub const META_SPLIT_IDX_START: &str = "split_idx_start";

/// Primitive metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Bool(b) => write!(f, "{}", b),
            MetaValue::Int(i) => write!(f, "{}", i),
            MetaValue::Float(x) => write!(f, "{}", x),
            MetaValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        MetaValue::Text(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        MetaValue::Text(value)
    }
}

impl From<i64> for MetaValue {
    fn from(value: i64) -> Self {
        MetaValue::Int(value)
    }
}

impl From<usize> for MetaValue {
    fn from(value: usize) -> Self {
        MetaValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for MetaValue {
    fn from(value: f64) -> Self {
        MetaValue::Float(value)
    }
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        MetaValue::Bool(value)
    }
}

pub type Metadata = BTreeMap<String, MetaValue>;

/// A unit of content plus metadata.
///
/// Documents are values: stages that change content build a new document
/// (and therefore a new id) instead of editing one in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub meta: Metadata,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding: Vec<f32>,
}

impl Document {
    /// Content-derived id: identical content and metadata always hash to the same id.
    pub fn generate_id(content: &str, meta: &Metadata) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        for (key, value) in meta {
            hasher.update([0u8]);
            hasher.update(key.as_bytes());
            hasher.update([b'=']);
            hasher.update(value.to_string().as_bytes());
        }
        let hash = hasher.finalize();
        hex::encode(&hash[..16])
    }

    pub fn new(content: impl Into<String>, meta: Metadata) -> Self {
        let content = content.into();
        let id = Self::generate_id(&content, &meta);
        Self {
            id,
            content,
            meta,
            embedding: Vec::new(),
        }
    }

    /// Build a document for a file, carrying `source` and `filename`.
    pub fn from_file(content: impl Into<String>, source: &str, filename: &str) -> Self {
        let mut meta = Metadata::new();
        meta.insert(META_SOURCE.to_string(), source.into());
        meta.insert(META_FILENAME.to_string(), filename.into());
        Self::new(content, meta)
    }

    /// Store-safe chunk id. UUIDv5 so backends that require UUID keys accept it.
    pub fn chunk_id(parent_id: &str, split_id: usize) -> String {
        use uuid::Uuid;
        let name = format!("{}:{}", parent_id, split_id);
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
    }

    /// Derive a chunk that inherits this document's metadata.
    pub fn split(&self, content: String, split_id: usize, split_idx_start: usize) -> Self {
        let mut meta = self.meta.clone();
        meta.insert(META_SOURCE_ID.to_string(), self.id.clone().into());
        meta.insert(META_SPLIT_ID.to_string(), split_id.into());
        meta.insert(META_SPLIT_IDX_START.to_string(), split_idx_start.into());
        Self {
            id: Self::chunk_id(&self.id, split_id),
            content,
            meta,
            embedding: Vec::new(),
        }
    }

    /// Same metadata, new content; the id is recomputed.
    pub fn with_content(&self, content: String) -> Self {
        Self::new(content, self.meta.clone())
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<MetaValue>) -> Self {
        self.meta.insert(key.to_string(), value.into());
        self.id = Self::generate_id(&self.content, &self.meta);
        self
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        match self.meta.get(key) {
            Some(MetaValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn meta_int(&self, key: &str) -> Option<i64> {
        match self.meta.get(key) {
            Some(MetaValue::Int(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn source(&self) -> Option<&str> {
        self.meta_str(META_SOURCE)
    }

    pub fn filename(&self) -> Option<&str> {
        self.meta_str(META_FILENAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_is_stable() {
        let a = Document::from_file("hello", "/data/a.txt", "a.txt");
        let b = Document::from_file("hello", "/data/a.txt", "a.txt");
        assert_eq!(a.id, b.id);
        assert_eq!(a.id.len(), 32);
    }

    #[test]
    fn test_generate_id_depends_on_content_and_meta() {
        let a = Document::from_file("hello", "/data/a.txt", "a.txt");
        let b = Document::from_file("hello!", "/data/a.txt", "a.txt");
        let c = Document::from_file("hello", "/data/b.txt", "b.txt");
        assert_ne!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_chunk_id_is_uuid() {
        let id = Document::chunk_id("abc123", 5);
        assert_eq!(id.len(), 36);
        assert_eq!(id.chars().filter(|c| *c == '-').count(), 4);
        assert_eq!(id, Document::chunk_id("abc123", 5));
        assert_ne!(id, Document::chunk_id("abc123", 6));
    }

    #[test]
    fn test_split_inherits_and_extends_meta() {
        let parent = Document::from_file("One. Two.", "/data/a.txt", "a.txt");
        let chunk = parent.split("Two.".to_string(), 1, 5);
        assert_eq!(chunk.source(), Some("/data/a.txt"));
        assert_eq!(chunk.filename(), Some("a.txt"));
        assert_eq!(chunk.meta_str(META_SOURCE_ID), Some(parent.id.as_str()));
        assert_eq!(chunk.meta_int(META_SPLIT_ID), Some(1));
        assert_eq!(chunk.meta_int(META_SPLIT_IDX_START), Some(5));
    }

    #[test]
    fn test_meta_value_untagged_serde() {
        let doc = Document::from_file("x", "/a.pdf", "a.pdf").with_meta(META_PAGE_NUMBER, 3usize);
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["meta"]["page_number"], 3);
        assert!(json.get("embedding").is_none());
        let back: Document = serde_json::from_value(json).unwrap();
        assert_eq!(back.meta_int(META_PAGE_NUMBER), Some(3));
    }
}
