use std::fmt::Display;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::error::CacheError;

/// Seconds since the Unix epoch.
pub type Timestamp = i64;

pub const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Change,
    Announcement,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Change => "change",
            Self::Announcement => "announcement",
        }
    }
}

impl Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "change" => Ok(Self::Change),
            "announcement" => Ok(Self::Announcement),
            _ => Err(CacheError::validation(format!("unknown document type '{s}'"))),
        }
    }
}

/// A business document as produced and consumed at the system boundary.
///
/// Attributes other than the ones the cache cares about are kept in `extra` so that a document survives a trip
/// through the cache byte-for-byte equivalent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id:          String,
    #[serde(rename = "type")]
    pub doc_type:    DocumentType,
    pub customers:   Vec<String>,
    pub status:      String,
    pub created_at:  Timestamp,
    pub modified_at: Timestamp,
    #[serde(flatten)]
    pub extra:       serde_json::Map<String, serde_json::Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, doc_type: DocumentType, customers: Vec<String>, created_at: Timestamp) -> Self {
        Self {
            id: id.into(),
            doc_type,
            customers,
            status: "draft".to_string(),
            created_at,
            modified_at: created_at,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn with_modified_at(mut self, modified_at: Timestamp) -> Self {
        self.modified_at = modified_at;
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(name.into(), value);
        self
    }
}

/// Opaque address of an object in the primary store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Locator {
    pub bucket: String,
    pub key:    String,
}

impl Locator {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key:    key.into(),
        }
    }
}

impl Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Maps documents to their canonical primary store location and back.
///
/// Canonical keys look like `{prefix}{type}/{id}.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyLayout {
    pub bucket: String,
    pub prefix: String,
}

impl KeyLayout {
    pub const SUFFIX: &'static str = ".json";

    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    pub fn locator_for(&self, doc_type: DocumentType, id: &str) -> Locator {
        Locator::new(
            self.bucket.clone(),
            format!("{}{}/{}{}", self.prefix, doc_type, id, Self::SUFFIX),
        )
    }

    /// Resolves the document identifier implied by a locator: the last key segment without the `.json` suffix.
    pub fn document_id(&self, locator: &Locator) -> Result<String, CacheError> {
        let name = locator.key.rsplit('/').next().unwrap_or_default();
        match name.strip_suffix(Self::SUFFIX) {
            Some(id) if !id.is_empty() => Ok(id.to_string()),
            _ => Err(CacheError::validation(format!(
                "locator '{locator}' does not name a document object"
            ))),
        }
    }
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self::new("documents", "")
    }
}

/// The cache's projection of a [`Document`]. Field names follow the persisted record schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub id:                  String,
    #[serde(rename = "type")]
    pub doc_type:            DocumentType,
    pub primary_customer:    String,
    pub customers:           Vec<String>,
    pub status:              String,
    pub created_at:          Timestamp,
    pub modified_at:         Timestamp,
    pub storage_locator:     Locator,
    pub expires_at:          Timestamp,
    pub serialized_document: String,
}

impl CacheEntry {
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }

    pub fn partition_for(&self, index: Index) -> &str {
        match index {
            Index::TypeTime => self.doc_type.as_str(),
            Index::CustomerTime => &self.primary_customer,
            Index::StatusTime => &self.status,
        }
    }

    pub fn cursor(&self) -> IndexCursor {
        IndexCursor {
            created_at: self.created_at,
            id:         self.id.clone(),
        }
    }
}

/// Secondary indexes over cache entries. All of them order by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Index {
    TypeTime,
    CustomerTime,
    StatusTime,
}

impl Index {
    pub const ALL: [Index; 3] = [Index::TypeTime, Index::CustomerTime, Index::StatusTime];

    pub fn name(&self) -> &'static str {
        match self {
            Self::TypeTime => "type-createdAt-index",
            Self::CustomerTime => "primaryCustomer-createdAt-index",
            Self::StatusTime => "status-createdAt-index",
        }
    }
}

impl Display for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A time-bounded query on one index partition. Both bounds are inclusive. Re-issuing the same query restarts it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexQuery {
    pub index:     Index,
    pub partition: String,
    pub start:     Timestamp,
    pub end:       Timestamp,
}

impl IndexQuery {
    pub fn new(index: Index, partition: impl Into<String>, start: Timestamp, end: Timestamp) -> Self {
        Self {
            index,
            partition: partition.into(),
            start,
            end,
        }
    }

    pub fn validate(&self) -> Result<(), CacheError> {
        if self.partition.is_empty() {
            return Err(CacheError::validation(format!("empty partition value for {}", self.index)));
        }
        if self.start > self.end {
            return Err(CacheError::validation(format!(
                "time range start {} is after end {}",
                self.start, self.end
            )));
        }
        Ok(())
    }

    pub fn matches(&self, entry: &CacheEntry) -> bool {
        entry.partition_for(self.index) == self.partition
            && entry.created_at >= self.start
            && entry.created_at <= self.end
    }
}

/// Last evaluated position of a paginated index query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexCursor {
    pub created_at: Timestamp,
    pub id:         String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub entries: Vec<CacheEntry>,
    /// Present when more results may follow.
    pub next:    Option<IndexCursor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Upsert,
    Delete,
}

/// Signal that the primary store was mutated outside of the write-through path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub kind:    EventKind,
    pub locator: Locator,
}

impl ChangeNotification {
    pub fn upsert(locator: Locator) -> Self {
        Self {
            kind: EventKind::Upsert,
            locator,
        }
    }

    pub fn delete(locator: Locator) -> Self {
        Self {
            kind: EventKind::Delete,
            locator,
        }
    }
}
