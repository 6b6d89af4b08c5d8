//! In-memory stand-ins for the object store, record store and notifier.

use crate::error::{GalleryError, Result};
use crate::notifier::Notifier;
use crate::object_store::ObjectStore;
use crate::photo_store::{
    NewPhoto, PageRequest, Photo, PhotoFilter, PhotoPage, PhotoRepository, PhotoStatus,
    PhotoUpdate,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const PUBLIC_BASE: &str = "https://cdn.test";

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, (Vec<u8>, String)>>,
    pub fail_writes: AtomicBool,
    pub fail_deletes: AtomicBool,
}

impl MemoryObjectStore {
    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn insert_raw(&self, key: &str) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (vec![1, 2, 3], "image/jpeg".to_string()));
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<String> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(GalleryError::StorageWrite {
                key: key.to_string(),
                message: "quota exceeded".to_string(),
            });
        }
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (data, content_type.to_string()));
        Ok(key.to_string())
    }

    async fn move_object(&self, from: &str, to: &str) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        let object = objects.remove(from).ok_or_else(|| GalleryError::StorageMove {
            from: from.to_string(),
            to: to.to_string(),
            message: "source object does not exist".to_string(),
        })?;
        objects.insert(to.to_string(), object);
        Ok(())
    }

    async fn remove(&self, keys: &[String]) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(GalleryError::StorageDelete {
                key: keys.join(","),
                message: "service unavailable".to_string(),
            });
        }
        let mut objects = self.objects.lock().unwrap();
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{PUBLIC_BASE}/{key}")
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Record store with a logical clock so creation order is deterministic
#[derive(Default)]
pub struct MemoryPhotoStore {
    photos: Mutex<BTreeMap<Uuid, Photo>>,
    clock: AtomicI64,
    pub fail_inserts: AtomicBool,
}

impl MemoryPhotoStore {
    pub fn all(&self) -> Vec<Photo> {
        self.photos.lock().unwrap().values().cloned().collect()
    }

    pub fn count_with_status(&self, status: PhotoStatus) -> usize {
        self.all().iter().filter(|p| p.status == status).count()
    }
}

#[async_trait]
impl PhotoRepository for MemoryPhotoStore {
    async fn insert(&self, photo: NewPhoto) -> Result<Photo> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(GalleryError::RecordWrite("constraint violation".to_string()));
        }
        let tick = self.clock.fetch_add(1, Ordering::SeqCst);
        let record = Photo {
            id: Uuid::new_v4(),
            title: photo.title,
            description: photo.description,
            category: photo.category,
            storage_key: photo.storage_key,
            image_url: photo.image_url,
            thumbnail_url: photo.thumbnail_url,
            upload_id: photo.upload_id,
            uploader_name: photo.uploader_name,
            uploader_email: photo.uploader_email,
            status: PhotoStatus::Pending,
            rejection_reason: None,
            reviewed_by: None,
            reviewed_at: None,
            created_at: Utc::now() + Duration::milliseconds(tick),
        };
        self.photos.lock().unwrap().insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Photo> {
        self.photos
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(GalleryError::NotFound(id))
    }

    async fn update(&self, id: Uuid, changes: PhotoUpdate) -> Result<Photo> {
        let mut photos = self.photos.lock().unwrap();
        let photo = photos.get_mut(&id).ok_or(GalleryError::NotFound(id))?;
        changes.apply_to(photo);
        Ok(photo.clone())
    }

    async fn list(&self, filter: &PhotoFilter, page: PageRequest) -> Result<PhotoPage> {
        let mut matching: Vec<Photo> = self
            .all()
            .into_iter()
            .filter(|p| filter.matches(p))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = matching.len() as i64;
        let items = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .collect();

        Ok(PhotoPage { items, total })
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.photos.lock().unwrap().remove(&id);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Sent e-mail as seen by [`RecordingNotifier`]
#[derive(Debug, Clone)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Forwards every e-mail to a channel, optionally failing after forwarding
pub struct RecordingNotifier {
    tx: mpsc::UnboundedSender<SentEmail>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new(fail: bool) -> (Self, mpsc::UnboundedReceiver<SentEmail>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, fail }, rx)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<()> {
        let _ = self.tx.send(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: html_body.to_string(),
        });
        if self.fail {
            return Err(GalleryError::Notification {
                to: to.to_string(),
                message: "smtp down".to_string(),
            });
        }
        Ok(())
    }
}

/// Wait for the next e-mail a spawned dispatch produces
pub async fn next_email(rx: &mut mpsc::UnboundedReceiver<SentEmail>) -> SentEmail {
    tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for notification")
        .expect("notifier dropped")
}
