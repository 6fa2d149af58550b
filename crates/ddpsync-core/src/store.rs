//! Local document cache
//!
//! In-memory replica of the server-side collections, fed by `added`,
//! `changed` and `removed` messages.
//!
//! ## Locking
//!
//! The outer map is only locked long enough to look up (or create) a
//! collection. Each collection has its own lock, so mutations of different
//! collections never wait on each other, and every mutation of a document
//! happens under its collection's write lock. Readers get owned snapshots.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::document::{Collection, Document, Fields};
use crate::locks::{read, write};

type SharedCollection = Arc<RwLock<HashMap<String, Fields>>>;

/// Replica of server collections
#[derive(Debug, Default)]
pub struct DocumentStore {
    collections: RwLock<HashMap<String, SharedCollection>>,
}

impl DocumentStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a document, creating the collection on first use
    pub fn add(&self, collection: &str, doc_id: &str, fields: Fields) {
        let docs = self.collection_or_create(collection);
        write(&docs).insert(doc_id.to_string(), fields);
        debug!("Added doc {} to collection {}", doc_id, collection);
    }

    /// Merge `set` into a document, then drop every field named in `clear`
    ///
    /// Returns `false` without touching anything when the collection or the
    /// document is unknown. A field both set and cleared ends up cleared.
    pub fn update(&self, collection: &str, doc_id: &str, set: Fields, clear: &[String]) -> bool {
        let Some(docs) = self.collection(collection) else {
            warn!("Received invalid changed msg for collection {}", collection);
            return false;
        };

        let mut docs = write(&docs);
        let Some(doc) = docs.get_mut(doc_id) else {
            warn!(
                "Received changed msg for unknown doc {} in collection {}",
                doc_id, collection
            );
            return false;
        };

        doc.extend(set);
        for name in clear {
            doc.remove(name);
        }
        true
    }

    /// Delete a document
    ///
    /// Returns `false` when the collection is unknown. For a known collection
    /// the result is `true` whether or not the document existed.
    pub fn remove(&self, collection: &str, doc_id: &str) -> bool {
        let Some(docs) = self.collection(collection) else {
            warn!("Received invalid removed msg for collection {}", collection);
            return false;
        };

        write(&docs).remove(doc_id);
        debug!("Removed doc {} from collection {}", doc_id, collection);
        true
    }

    /// Snapshot of a whole collection
    pub fn get_collection(&self, collection: &str) -> Option<Collection> {
        let docs = self.collection(collection)?;
        let snapshot = read(&docs).clone();
        Some(snapshot)
    }

    /// Snapshot of a single document
    pub fn get_document(&self, collection: &str, doc_id: &str) -> Option<Document> {
        let docs = self.collection(collection)?;
        let fields = read(&docs).get(doc_id).cloned()?;
        Some(Document::new(doc_id, fields))
    }

    /// Names of all collections seen so far
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.collections).keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of documents in a collection
    pub fn len(&self, collection: &str) -> Option<usize> {
        let docs = self.collection(collection)?;
        let len = read(&docs).len();
        Some(len)
    }

    /// Drop every collection
    pub fn reset(&self) {
        write(&self.collections).clear();
    }

    fn collection(&self, name: &str) -> Option<SharedCollection> {
        read(&self.collections).get(name).cloned()
    }

    fn collection_or_create(&self, name: &str) -> SharedCollection {
        if let Some(docs) = self.collection(name) {
            return docs;
        }

        write(&self.collections)
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!("Added collection {}", name);
                SharedCollection::default()
            })
            .clone()
    }
}
