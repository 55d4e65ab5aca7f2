//! In-process [`DocumentStore`].
//!
//! All documents live in memory behind one `RwLock`; every mutation bumps a
//! revision, flushes to the optional redb save file and broadcasts a
//! [`Change`]. Mutations hold the write lock for their whole
//! check-apply-flush sequence, so an [`Update`] with preconditions is a real
//! compare-and-swap.

use crate::persist::{SaveFile, SaveFileError};
use crate::store::{
    Change, ChangeKind, Document, DocumentStore, Fields, Query, StoreError, Update, CREATED_AT,
};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use uuid::Uuid;

const CHANGE_CAPACITY: usize = 256;

struct Inner {
    collections: HashMap<String, BTreeMap<String, Document>>,
    revision: u64,
    last_stamp: Option<DateTime<Utc>>,
}

impl Inner {
    /// Server timestamp, strictly greater than the previous one.
    fn next_stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_stamp {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }
}

fn stamp_of(doc: &Document) -> Option<DateTime<Utc>> {
    let raw = doc.fields.get(CREATED_AT)?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|stamp| stamp.with_timezone(&Utc))
}

/// Cloneable handle (Arc inside).
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<RwLock<Inner>>,
    save_file: Option<SaveFile>,
    tx: broadcast::Sender<Change>,
}

impl LocalStore {
    /// A store that forgets everything on drop.
    pub fn in_memory() -> Self {
        Self::from_parts(HashMap::new(), 0, None, None)
    }

    /// Load every document from `save_file`, then flush to it on every mutation.
    pub fn open(save_file: SaveFile) -> Result<Self, SaveFileError> {
        let snapshot = save_file.load()?;
        let mut collections: HashMap<String, BTreeMap<String, Document>> = HashMap::new();
        let mut last_stamp = None;
        for (collection, doc) in snapshot.documents {
            last_stamp = last_stamp.max(stamp_of(&doc));
            collections
                .entry(collection)
                .or_default()
                .insert(doc.id.clone(), doc);
        }
        Ok(Self::from_parts(collections, snapshot.revision, last_stamp, Some(save_file)))
    }

    fn from_parts(
        collections: HashMap<String, BTreeMap<String, Document>>,
        revision: u64,
        last_stamp: Option<DateTime<Utc>>,
        save_file: Option<SaveFile>,
    ) -> Self {
        let (tx, _) = broadcast::channel(CHANGE_CAPACITY);
        LocalStore {
            inner: Arc::new(RwLock::new(Inner {
                collections,
                revision,
                last_stamp,
            })),
            save_file,
            tx,
        }
    }

    pub fn revision(&self) -> u64 {
        self.read().map(|inner| inner.revision).unwrap_or(0)
    }

    pub fn document_count(&self) -> usize {
        self.read()
            .map(|inner| inner.collections.values().map(BTreeMap::len).sum())
            .unwrap_or(0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::Persist("store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, StoreError> {
        self.inner
            .write()
            .map_err(|_| StoreError::Persist("store lock poisoned".into()))
    }

    fn flush_put(&self, collection: &str, doc: &Document, revision: u64) -> Result<(), StoreError> {
        if let Some(save_file) = &self.save_file {
            save_file.put(collection, doc, revision).map_err(|e| {
                tracing::error!(collection, id = %doc.id, "save file flush failed: {e}");
                StoreError::Persist(e.to_string())
            })?;
        }
        Ok(())
    }

    fn flush_remove(&self, collection: &str, id: &str, revision: u64) -> Result<(), StoreError> {
        if let Some(save_file) = &self.save_file {
            save_file.remove(collection, id, revision).map_err(|e| {
                tracing::error!(collection, id, "save file flush failed: {e}");
                StoreError::Persist(e.to_string())
            })?;
        }
        Ok(())
    }

    fn announce(&self, revision: u64, collection: &str, id: &str, kind: ChangeKind) {
        // No receivers is fine.
        let _ = self.tx.send(Change {
            revision,
            collection: collection.to_string(),
            id: id.to_string(),
            kind,
        });
    }
}

impl DocumentStore for LocalStore {
    fn create(&self, collection: &str, mut fields: Fields) -> Result<Document, StoreError> {
        let mut inner = self.write()?;

        let stamp = inner.next_stamp();
        fields.insert(
            CREATED_AT.to_string(),
            Value::String(stamp.to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
        let doc = Document {
            id: Uuid::new_v4().simple().to_string(),
            fields,
        };

        let revision = inner.revision + 1;
        self.flush_put(collection, &doc, revision)?;

        inner.revision = revision;
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(doc.id.clone(), doc.clone());
        drop(inner);

        self.announce(revision, collection, &doc.id, ChangeKind::Created);
        Ok(doc)
    }

    fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let inner = self.read()?;
        Ok(inner
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let mut docs: Vec<Document> = {
            let inner = self.read()?;
            inner
                .collections
                .get(&query.collection)
                .map(|docs| docs.values().cloned().collect())
                .unwrap_or_default()
        };
        query.sort(&mut docs);
        Ok(docs)
    }

    fn update(&self, collection: &str, id: &str, update: Update) -> Result<Document, StoreError> {
        let mut inner = self.write()?;
        let revision = inner.revision + 1;

        let current = inner
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;

        let mut fields = current.fields.clone();
        update.apply_to(&mut fields)?;
        let doc = Document { id: id.to_string(), fields };

        self.flush_put(collection, &doc, revision)?;

        inner.revision = revision;
        if let Some(docs) = inner.collections.get_mut(collection) {
            docs.insert(id.to_string(), doc.clone());
        }
        drop(inner);

        self.announce(revision, collection, id, ChangeKind::Updated);
        Ok(doc)
    }

    fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let mut inner = self.write()?;

        let exists = inner
            .collections
            .get(collection)
            .is_some_and(|docs| docs.contains_key(id));
        if !exists {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }

        let revision = inner.revision + 1;
        self.flush_remove(collection, id, revision)?;

        inner.revision = revision;
        if let Some(docs) = inner.collections.get_mut(collection) {
            docs.remove(id);
        }
        drop(inner);

        self.announce(revision, collection, id, ChangeKind::Deleted);
        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<Change> {
        self.tx.subscribe()
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{subscribe, Patch};
    use serde_json::json;
    use std::fs;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn create_assigns_id_and_increasing_timestamps() {
        let store = LocalStore::in_memory();
        let a = store.create("tasks", fields(json!({ "title": "a" }))).unwrap();
        let b = store.create("tasks", fields(json!({ "title": "b" }))).unwrap();

        assert_ne!(a.id, b.id);
        let ta = a.get(CREATED_AT).and_then(Value::as_str).unwrap();
        let tb = b.get(CREATED_AT).and_then(Value::as_str).unwrap();
        assert!(ta < tb);
        assert_eq!(store.revision(), 2);
    }

    #[test]
    fn query_orders_by_creation() {
        let store = LocalStore::in_memory();
        for title in ["first", "second", "third"] {
            store.create("swaps", fields(json!({ "title": title }))).unwrap();
        }

        let newest = store.query(&Query::newest_first("swaps")).unwrap();
        let titles: Vec<_> = newest.iter().map(|d| d.fields["title"].clone()).collect();
        assert_eq!(titles, [json!("third"), json!("second"), json!("first")]);

        let oldest = store.query(&Query::oldest_first("swaps")).unwrap();
        assert_eq!(oldest[0].fields["title"], json!("first"));
    }

    #[test]
    fn nested_collections_are_separate() {
        let store = LocalStore::in_memory();
        store.create("tasks/t1/chat", fields(json!({ "text": "hi" }))).unwrap();
        store.create("tasks/t2/chat", fields(json!({ "text": "yo" }))).unwrap();

        assert_eq!(store.query(&Query::collection("tasks/t1/chat")).unwrap().len(), 1);
        assert!(store.query(&Query::collection("tasks")).unwrap().is_empty());
    }

    #[test]
    fn update_missing_document_is_not_found() {
        let store = LocalStore::in_memory();
        let err = store
            .update("tasks", "nope", Update::new().patch(Patch::set("status", "Open")))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert_eq!(store.revision(), 0);
    }

    #[test]
    fn compare_and_swap_has_one_winner() {
        let store = LocalStore::in_memory();
        let task = store.create("tasks", fields(json!({ "status": "Open" }))).unwrap();

        let claim = |who: &str| {
            store.update(
                "tasks",
                &task.id,
                Update::new()
                    .require("status", "Open")
                    .patch(Patch::set("status", "Assigned"))
                    .patch(Patch::set("winner", who)),
            )
        };

        assert!(claim("rahul").is_ok());
        let err = claim("priya").unwrap_err();
        assert_eq!(err, StoreError::PreconditionFailed { field: "status".into() });

        let stored = store.get("tasks", &task.id).unwrap().unwrap();
        assert_eq!(stored.fields["winner"], json!("rahul"));
        assert_eq!(store.revision(), 2);
    }

    #[test]
    fn delete_removes_document() {
        let store = LocalStore::in_memory();
        let doc = store.create("resources", fields(json!({}))).unwrap();

        store.delete("resources", &doc.id).unwrap();
        assert!(store.get("resources", &doc.id).unwrap().is_none());
        assert!(matches!(
            store.delete("resources", &doc.id).unwrap_err(),
            StoreError::NotFound { .. }
        ));
    }

    #[test]
    fn save_file_round_trip() {
        let path = format!("/tmp/skillswap_local_store_{}.redb", std::process::id());
        let _ = fs::remove_file(&path);

        let id = {
            let store = LocalStore::open(SaveFile::open(&path).unwrap()).unwrap();
            let doc = store.create("tasks", fields(json!({ "title": "Create PPT" }))).unwrap();
            store
                .update("tasks", &doc.id, Update::new().patch(Patch::set("status", "Assigned")))
                .unwrap();
            doc.id
        };

        // Reboot.
        let store = LocalStore::open(SaveFile::open(&path).unwrap()).unwrap();
        assert_eq!(store.revision(), 2);
        let doc = store.get("tasks", &id).unwrap().unwrap();
        assert_eq!(doc.fields["status"], json!("Assigned"));
        assert_eq!(doc.fields["title"], json!("Create PPT"));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn reopened_store_stamps_after_persisted_documents() {
        let path = format!("/tmp/skillswap_local_store_stamps_{}.redb", std::process::id());
        let _ = fs::remove_file(&path);

        let future = "2999-01-01T00:00:00.000000Z";
        {
            let save_file = SaveFile::open(&path).unwrap();
            let mut body = fields(json!({ "title": "skewed clock" }));
            body.insert(CREATED_AT.to_string(), json!(future));
            let doc = Document { id: "from-the-future".into(), fields: body };
            save_file.put("tasks", &doc, 1).unwrap();
        }

        let store = LocalStore::open(SaveFile::open(&path).unwrap()).unwrap();
        let fresh = store.create("tasks", fields(json!({ "title": "after reboot" }))).unwrap();
        let stamp = fresh.get(CREATED_AT).and_then(Value::as_str).unwrap();
        assert!(stamp > future, "{stamp} should sort after {future}");

        let newest = store.query(&Query::newest_first("tasks")).unwrap();
        assert_eq!(newest[0].id, fresh.id);

        let _ = fs::remove_file(&path);
    }

    #[tokio::test]
    async fn subscription_sees_only_its_collection() {
        let store = LocalStore::in_memory();
        let mut sub = subscribe(&store, Query::newest_first("tasks"));
        assert!(sub.snapshot().unwrap().is_empty());

        store.create("swaps", fields(json!({}))).unwrap();
        store.create("tasks", fields(json!({ "title": "a" }))).unwrap();

        let snapshot = sub.next().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].fields["title"], json!("a"));

        sub.cancel();
    }

    #[tokio::test]
    async fn subscription_delivers_deletes() {
        let store = LocalStore::in_memory();
        let doc = store.create("tasks", fields(json!({}))).unwrap();

        let mut sub = subscribe(&store, Query::newest_first("tasks"));
        store.delete("tasks", &doc.id).unwrap();

        assert!(sub.next().await.unwrap().is_empty());
    }
}
