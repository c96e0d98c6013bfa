use parking_lot::RwLock;
use std::sync::Arc;
use uuid::Uuid;

use crate::storage::SchemaRecord;

/// Client-held copy of the schema list.
///
/// Nothing refreshes it on its own: whoever creates or deletes a schema calls `insert` or `remove`,
/// and `invalidate` forces the next `get` to miss so the list gets fetched again.
#[derive(Clone, Default)]
pub struct SchemaCache {
    records: Arc<RwLock<Option<Vec<SchemaRecord>>>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached list, or `None` if it was never filled or got invalidated.
    pub fn get(&self) -> Option<Vec<SchemaRecord>> {
        self.records.read().clone()
    }

    /// Return the cached list, filling it with `fetch` on a miss.
    pub fn get_or_fetch<E>(
        &self,
        fetch: impl FnOnce() -> Result<Vec<SchemaRecord>, E>,
    ) -> Result<Vec<SchemaRecord>, E> {
        if let Some(records) = self.get() {
            return Ok(records);
        }
        let records = fetch()?;
        self.replace(records.clone());
        Ok(records)
    }

    pub fn replace(&self, records: Vec<SchemaRecord>) {
        *self.records.write() = Some(records);
    }

    /// Append a freshly created record. Does nothing while the cache is empty.
    pub fn insert(&self, record: SchemaRecord) {
        if let Some(records) = self.records.write().as_mut() {
            records.retain(|existing| existing.id != record.id);
            records.push(record);
        }
    }

    pub fn remove(&self, id: &Uuid) {
        if let Some(records) = self.records.write().as_mut() {
            records.retain(|existing| &existing.id != id);
        }
    }

    pub fn invalidate(&self) {
        *self.records.write() = None;
    }
}
