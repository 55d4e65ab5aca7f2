//! Campus resources: shared notes, papers and uploaded PDFs.

use crate::blob::{BlobRef, BlobStore};
use crate::exchange::{blob_key, optional, required, Exchange, ExchangeError, Feed, RESOURCES};
use crate::models::{Actor, NewResource, Resource, ResourceType};
use crate::store::{decode, encode, DocumentStore, Patch, Query, StoreError, Update};
use tracing::{error, info, warn};

impl<S: DocumentStore, B: BlobStore> Exchange<S, B> {
    /// Share a resource. `Pdf` resources carry an upload, which is stored in
    /// the blob store before the document is written; the others carry a URL.
    pub fn share_resource(&self, sharer: &Actor, new: NewResource) -> Result<Resource, ExchangeError> {
        let title = required(&new.title, "title")?;
        let shared_by = required(sharer.name(), "sharer name")?;

        let (resource_url, file_name, blob) = match new.resource_type {
            ResourceType::Pdf => {
                let upload = new
                    .file
                    .ok_or_else(|| ExchangeError::Validation("a PDF file is required".into()))?;
                if !upload.looks_like_pdf() {
                    return Err(ExchangeError::Validation(format!(
                        "{} is not a PDF",
                        upload.file_name
                    )));
                }
                let blob = self
                    .blobs()
                    .put(&blob_key(RESOURCES, &upload.file_name), &upload.bytes)?;
                let url = self.blobs().public_url(&blob)?;
                (url, Some(upload.file_name), Some(blob))
            }
            ResourceType::Notes | ResourceType::Paper => {
                let url = required(new.resource_url.as_deref().unwrap_or(""), "resource URL")?;
                (url.to_string(), None, None)
            }
        };

        let resource = Resource {
            id: String::new(),
            title: title.to_string(),
            description: optional(new.description.as_deref()),
            resource_type: new.resource_type,
            resource_url,
            file_name,
            storage_key: blob.as_ref().map(|b| b.key.clone()),
            shared_by: shared_by.to_string(),
            downloads: 0,
            college: self.college().to_string(),
            created_at: None,
        };

        let created = encode(&resource).and_then(|fields| self.store().create(RESOURCES, fields));
        let doc = match created {
            Ok(doc) => doc,
            Err(e) => {
                if let Some(blob) = &blob {
                    if let Err(cleanup) = self.blobs().delete(blob) {
                        error!(key = %blob.key, "orphaned upload: {cleanup}");
                    }
                }
                return Err(e.into());
            }
        };

        let resource: Resource = decode(&doc)?;
        info!(resource_id = %resource.id, shared_by, "resource shared");
        Ok(resource)
    }

    pub fn resource(&self, resource_id: &str) -> Result<Resource, ExchangeError> {
        self.load(RESOURCES, resource_id, "resource")
    }

    /// Newest first.
    pub fn resources(&self) -> Result<Vec<Resource>, ExchangeError> {
        self.list(&Query::newest_first(RESOURCES))
    }

    /// Count one download and return where to fetch it.
    pub fn record_download(&self, resource_id: &str) -> Result<String, ExchangeError> {
        let doc = self
            .store()
            .update(RESOURCES, resource_id, Update::new().patch(Patch::increment("downloads", 1)))
            .map_err(|e| ExchangeError::from_store(e, "resource", resource_id))?;
        let resource: Resource = decode(&doc)?;
        info!(resource_id, downloads = resource.downloads, "download recorded");
        Ok(resource.resource_url)
    }

    /// Remove the uploaded file (if any), then the document. A file that is
    /// already gone does not block the delete.
    pub fn delete_resource(&self, resource_id: &str) -> Result<(), ExchangeError> {
        let resource = self.resource(resource_id)?;
        if let Some(key) = resource.storage_key {
            match self.blobs().delete(&BlobRef { key }) {
                Ok(()) | Err(StoreError::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.store()
            .delete(RESOURCES, resource_id)
            .map_err(|e| ExchangeError::from_store(e, "resource", resource_id))?;
        warn!(resource_id, "resource deleted");
        Ok(())
    }
}

impl<S: DocumentStore + Clone, B: BlobStore> Exchange<S, B> {
    pub fn watch_resources(&self) -> Feed<S, Resource> {
        self.feed(Query::newest_first(RESOURCES))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::exchange::testing::exchange;
    use crate::local_store::LocalStore;
    use crate::models::Upload;
    use crate::store::{Change, Document, Fields};
    use tokio::sync::broadcast;

    /// Reads and edits pass through; every create fails as if the disk were full.
    struct FullDiskStore(LocalStore);

    impl DocumentStore for FullDiskStore {
        fn create(&self, _collection: &str, _fields: Fields) -> Result<Document, StoreError> {
            Err(StoreError::Io("disk full".into()))
        }

        fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
            self.0.get(collection, id)
        }

        fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
            self.0.query(query)
        }

        fn update(&self, collection: &str, id: &str, update: Update) -> Result<Document, StoreError> {
            self.0.update(collection, id, update)
        }

        fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
            self.0.delete(collection, id)
        }

        fn changes(&self) -> broadcast::Receiver<Change> {
            self.0.changes()
        }
    }

    fn alex() -> Actor {
        Actor::new("Alex Johnson")
    }

    fn link(title: &str) -> NewResource {
        NewResource {
            title: title.into(),
            description: Some("  ".into()),
            resource_type: ResourceType::Notes,
            resource_url: Some("https://drive.example/notes".into()),
            file: None,
        }
    }

    fn pdf(file_name: &str, bytes: &[u8]) -> NewResource {
        NewResource {
            title: "DBMS unit 3".into(),
            description: Some("Normalization".into()),
            resource_type: ResourceType::Pdf,
            resource_url: None,
            file: Some(Upload { file_name: file_name.into(), bytes: bytes.to_vec() }),
        }
    }

    #[test]
    fn failed_write_removes_uploaded_pdf() {
        let x = Exchange::new(
            FullDiskStore(LocalStore::in_memory()),
            MemoryBlobStore::new("http://localhost:3000/files"),
            "Chandigarh University",
        );

        let err = x.share_resource(&alex(), pdf("unit3.pdf", b"%PDF-1.4 body")).unwrap_err();
        assert_eq!(err, ExchangeError::Store(StoreError::Io("disk full".into())));
        assert!(x.blobs().is_empty());
        assert!(x.resources().unwrap().is_empty());
    }

    #[test]
    fn share_link_resource() {
        let x = exchange();
        let r = x.share_resource(&alex(), link("OS notes")).unwrap();

        assert_eq!(r.resource_url, "https://drive.example/notes");
        assert_eq!(r.description, None);
        assert_eq!(r.downloads, 0);
        assert_eq!(r.college, "Chandigarh University");
        assert_eq!(r.shared_by, "Alex Johnson");
        assert_eq!(r.storage_key, None);
    }

    #[test]
    fn link_resource_needs_url() {
        let x = exchange();
        let mut new = link("OS notes");
        new.resource_url = Some(" ".into());
        assert!(matches!(x.share_resource(&alex(), new), Err(ExchangeError::Validation(_))));
    }

    #[test]
    fn share_pdf_uploads_blob() {
        let x = exchange();
        let r = x.share_resource(&alex(), pdf("unit 3.pdf", b"%PDF-1.7 ...")).unwrap();

        let key = r.storage_key.clone().unwrap();
        assert!(key.starts_with("resources/"));
        assert!(key.ends_with("_unit_3.pdf"));
        assert_eq!(r.resource_url, format!("http://localhost:3000/files/{key}"));
        assert_eq!(r.file_name.as_deref(), Some("unit 3.pdf"));
        assert_eq!(x.blobs().bytes(&key).unwrap(), b"%PDF-1.7 ...");
    }

    #[test]
    fn pdf_checks_happen_before_upload() {
        let x = exchange();

        let mut missing = pdf("a.pdf", b"%PDF");
        missing.file = None;
        assert!(matches!(x.share_resource(&alex(), missing), Err(ExchangeError::Validation(_))));

        let not_pdf = pdf("a.pdf", b"PK\x03\x04");
        assert!(matches!(x.share_resource(&alex(), not_pdf), Err(ExchangeError::Validation(_))));

        let wrong_ext = pdf("a.docx", b"%PDF");
        assert!(matches!(x.share_resource(&alex(), wrong_ext), Err(ExchangeError::Validation(_))));

        assert!(x.blobs().is_empty());
        assert!(x.resources().unwrap().is_empty());
    }

    #[test]
    fn downloads_are_counted() {
        let x = exchange();
        let r = x.share_resource(&alex(), link("OS notes")).unwrap();

        for _ in 0..3 {
            assert_eq!(x.record_download(&r.id).unwrap(), "https://drive.example/notes");
        }
        assert_eq!(x.resource(&r.id).unwrap().downloads, 3);
        assert!(matches!(x.record_download("gone"), Err(ExchangeError::NotFound { .. })));
    }

    #[test]
    fn delete_pdf_removes_blob_and_doc() {
        let x = exchange();
        let r = x.share_resource(&alex(), pdf("unit3.pdf", b"%PDF")).unwrap();

        x.delete_resource(&r.id).unwrap();
        assert!(x.blobs().is_empty());
        assert!(x.resources().unwrap().is_empty());
    }

    #[test]
    fn delete_tolerates_missing_blob() {
        let x = exchange();
        let r = x.share_resource(&alex(), pdf("unit3.pdf", b"%PDF")).unwrap();
        let key = r.storage_key.clone().unwrap();
        x.blobs().delete(&BlobRef { key }).unwrap();

        x.delete_resource(&r.id).unwrap();
        assert!(x.resources().unwrap().is_empty());
    }

    #[test]
    fn resources_newest_first() {
        let x = exchange();
        x.share_resource(&alex(), link("first")).unwrap();
        x.share_resource(&alex(), link("second")).unwrap();
        let titles: Vec<_> = x.resources().unwrap().into_iter().map(|r| r.title).collect();
        assert_eq!(titles, ["second", "first"]);
    }
}
