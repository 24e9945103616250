use chrono::DateTime;
use chrono::Days;

use crate::error::CacheError;
use crate::types::CacheEntry;
use crate::types::Document;
use crate::types::KeyLayout;
use crate::types::Locator;
use crate::types::Timestamp;
use crate::types::SECONDS_PER_DAY;

/// `created_at + ttl_days`, saturating at the ends of the timestamp range.
pub fn compute_expiry(created_at: Timestamp, ttl_days: u32) -> Timestamp {
    DateTime::from_timestamp(created_at, 0)
        .and_then(|created| created.checked_add_days(Days::new(ttl_days.into())))
        .map(|expires| expires.timestamp())
        .unwrap_or_else(|| created_at.saturating_add(i64::from(ttl_days) * SECONDS_PER_DAY))
}

/// The first customer code, exactly as provided.
pub fn primary_customer(customers: &[String]) -> Result<&str, CacheError> {
    customers
        .first()
        .map(String::as_str)
        .ok_or_else(|| CacheError::validation("document has no customers"))
}

/// Stateless mapping between documents and cache entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemConverter {
    ttl_days: u32,
    layout:   KeyLayout,
}

impl ItemConverter {
    pub fn new(ttl_days: u32, layout: KeyLayout) -> Self {
        Self { ttl_days, layout }
    }

    pub fn ttl_days(&self) -> u32 {
        self.ttl_days
    }

    pub fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    pub fn locator_for(&self, document: &Document) -> Locator {
        self.layout.locator_for(document.doc_type, &document.id)
    }

    pub fn validate(&self, document: &Document) -> Result<(), CacheError> {
        if document.id.trim().is_empty() {
            return Err(CacheError::validation("document has no identifier"));
        }
        primary_customer(&document.customers)?;
        if document.customers.iter().any(|c| c.trim().is_empty()) {
            return Err(CacheError::validation(format!(
                "document '{}' lists an empty customer code",
                document.id
            )));
        }
        Ok(())
    }

    /// Converts using the document's canonical locator.
    pub fn to_entry(&self, document: &Document) -> Result<CacheEntry, CacheError> {
        self.to_entry_at(document, self.locator_for(document))
    }

    pub fn to_entry_at(&self, document: &Document, locator: Locator) -> Result<CacheEntry, CacheError> {
        self.validate(document)?;

        Ok(CacheEntry {
            id:                  document.id.clone(),
            doc_type:            document.doc_type,
            primary_customer:    primary_customer(&document.customers)?.to_string(),
            customers:           document.customers.clone(),
            status:              document.status.clone(),
            created_at:          document.created_at,
            modified_at:         document.modified_at,
            storage_locator:     locator,
            expires_at:          compute_expiry(document.created_at, self.ttl_days),
            serialized_document: serde_json::to_string(document)?,
        })
    }

    /// Restores the document from the serialized copy carried by the entry.
    ///
    /// Guards against partially written entries: required attributes must be present and agree with the payload.
    pub fn from_entry(&self, entry: &CacheEntry) -> Result<Document, CacheError> {
        if entry.id.is_empty() {
            return Err(CacheError::validation("cache entry has no identifier"));
        }
        if entry.serialized_document.is_empty() {
            return Err(CacheError::validation(format!(
                "cache entry '{}' carries no document",
                entry.id
            )));
        }
        if entry.primary_customer.is_empty() || entry.customers.is_empty() {
            return Err(CacheError::validation(format!(
                "cache entry '{}' has no customers",
                entry.id
            )));
        }

        let document: Document = serde_json::from_str(&entry.serialized_document)?;
        if document.id != entry.id {
            return Err(CacheError::validation(format!(
                "cache entry '{}' holds document '{}'",
                entry.id, document.id
            )));
        }
        Ok(document)
    }
}

impl Default for ItemConverter {
    fn default() -> Self {
        Self::new(90, KeyLayout::default())
    }
}
