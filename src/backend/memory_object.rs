use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::instrument;

use crate::error::CacheError;
use crate::error::StoreKind;
use crate::traits::PrimaryStore;
use crate::types::Locator;

/// Primary store kept in process memory. Strongly consistent per object; overwrites are last-write-wins.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<Locator, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    pub fn contains(&self, locator: &Locator) -> bool {
        self.objects.read().contains_key(locator)
    }

    /// Raw object body, bypassing the async interface.
    pub fn object(&self, locator: &Locator) -> Option<Vec<u8>> {
        self.objects.read().get(locator).cloned()
    }
}

#[async_trait]
impl PrimaryStore for MemoryObjectStore {
    #[instrument(level = "trace", skip(self, body), fields(size = body.len()))]
    async fn put_object(&self, locator: &Locator, body: Vec<u8>) -> Result<(), CacheError> {
        self.objects.write().insert(locator.clone(), body);
        Ok(())
    }

    #[instrument(level = "trace", skip(self))]
    async fn get_object(&self, locator: &Locator) -> Result<Vec<u8>, CacheError> {
        self.objects
            .read()
            .get(locator)
            .cloned()
            .ok_or_else(|| CacheError::not_found(StoreKind::Primary, locator.to_string()))
    }

    #[instrument(level = "trace", skip(self))]
    async fn delete_object(&self, locator: &Locator) -> Result<(), CacheError> {
        self.objects.write().remove(locator);
        Ok(())
    }
}
