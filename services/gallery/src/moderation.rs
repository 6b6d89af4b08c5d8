use crate::auth::AdminIdentity;
use crate::error::{GalleryError, Result};
use crate::notifier::{Notification, NotificationDispatcher};
use crate::object_store::{approved_key_for, ObjectStore};
use crate::photo_store::{Photo, PhotoRepository, PhotoStatus, PhotoUpdate};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Recorded when an admin rejects without giving a reason
pub const DEFAULT_REJECTION_REASON: &str = "No reason provided";

/// Moderation state machine over photo status.
///
/// ```text
/// pending ──approve──▶ approved      (file pending/… → approved/…)
/// pending ──reject───▶ rejected      (file deleted)
/// rejected ─restore──▶ pending       (file NOT recreated)
/// any ─────delete────▶ gone          (file and record removed)
/// ```
///
/// Each operation reads the record, performs the file operation, then writes
/// the record, so a failed file operation leaves the record untouched.
/// Concurrent reviews of the same photo are last-write-wins.
pub struct ModerationService {
    photos: Arc<dyn PhotoRepository>,
    objects: Arc<dyn ObjectStore>,
    notifications: NotificationDispatcher,
}

impl ModerationService {
    pub fn new(
        photos: Arc<dyn PhotoRepository>,
        objects: Arc<dyn ObjectStore>,
        notifications: NotificationDispatcher,
    ) -> Self {
        Self {
            photos,
            objects,
            notifications,
        }
    }

    /// Publish a photo. Approving an approved photo refreshes the review
    /// stamp and re-sends the e-mail.
    #[instrument(
        skip(self, admin),
        fields(photo_id = %id, reviewer = %admin.email(), reviewer_id = %admin.id())
    )]
    pub async fn approve(&self, id: Uuid, admin: &AdminIdentity) -> Result<Photo> {
        let photo = self.photos.get_by_id(id).await?;

        let mut changes = PhotoUpdate {
            status: Some(PhotoStatus::Approved),
            rejection_reason: Some(None),
            reviewed_by: Some(Some(admin.email().to_string())),
            reviewed_at: Some(Some(Utc::now())),
            ..Default::default()
        };

        // Photos outside the pending prefix stay where they are
        if let Some(new_key) = approved_key_for(&photo.storage_key) {
            self.objects
                .move_object(&photo.storage_key, &new_key)
                .await?;
            let url = self.objects.public_url(&new_key);
            changes.storage_key = Some(new_key);
            changes.image_url = Some(url.clone());
            changes.thumbnail_url = Some(url);
        }

        let photo = self.photos.update(id, changes).await?;

        metrics::counter!("gallery.photos.approved").increment(1);
        info!(storage_key = %photo.storage_key, "Photo approved");

        self.notifications.dispatch(Notification::Approved {
            to: photo.uploader_email.clone(),
            title: photo.title.clone(),
        });

        Ok(photo)
    }

    /// Delete the file and keep the record as rejected with a reason
    #[instrument(
        skip(self, admin, reason),
        fields(photo_id = %id, reviewer = %admin.email(), reviewer_id = %admin.id())
    )]
    pub async fn reject(
        &self,
        id: Uuid,
        admin: &AdminIdentity,
        reason: Option<&str>,
    ) -> Result<Photo> {
        let photo = self.photos.get_by_id(id).await?;

        self.objects
            .remove(std::slice::from_ref(&photo.storage_key))
            .await?;

        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_REJECTION_REASON)
            .to_string();

        let photo = self
            .photos
            .update(
                id,
                PhotoUpdate {
                    status: Some(PhotoStatus::Rejected),
                    rejection_reason: Some(Some(reason.clone())),
                    reviewed_by: Some(Some(admin.email().to_string())),
                    reviewed_at: Some(Some(Utc::now())),
                    ..Default::default()
                },
            )
            .await?;

        metrics::counter!("gallery.photos.rejected").increment(1);
        info!(reason = %reason, "Photo rejected");

        self.notifications.dispatch(Notification::Rejected {
            to: photo.uploader_email.clone(),
            title: photo.title.clone(),
            reason,
        });

        Ok(photo)
    }

    /// Move a photo back to the review queue and clear its review fields.
    ///
    /// The file of a rejected photo was deleted and is not recreated, so the
    /// restored record points at a missing object until it is re-uploaded.
    #[instrument(
        skip(self, admin),
        fields(photo_id = %id, reviewer = %admin.email(), reviewer_id = %admin.id())
    )]
    pub async fn restore(&self, id: Uuid, admin: &AdminIdentity) -> Result<Photo> {
        let photo = self.photos.get_by_id(id).await?;

        match photo.status {
            PhotoStatus::Approved => {
                return Err(GalleryError::validation(
                    "Approved photos cannot be restored to pending",
                ));
            }
            PhotoStatus::Rejected => {
                warn!(
                    storage_key = %photo.storage_key,
                    "Restoring a rejected photo whose file was deleted"
                );
            }
            PhotoStatus::Pending => {}
        }

        let photo = self
            .photos
            .update(
                id,
                PhotoUpdate {
                    status: Some(PhotoStatus::Pending),
                    rejection_reason: Some(None),
                    reviewed_by: Some(None),
                    reviewed_at: Some(None),
                    ..Default::default()
                },
            )
            .await?;

        metrics::counter!("gallery.photos.restored").increment(1);
        info!("Photo restored to pending");

        Ok(photo)
    }

    /// Remove the file (best-effort) and the record. Deleting a photo that is
    /// already gone succeeds.
    #[instrument(
        skip(self, admin),
        fields(photo_id = %id, reviewer = %admin.email(), reviewer_id = %admin.id())
    )]
    pub async fn hard_delete(&self, id: Uuid, admin: &AdminIdentity) -> Result<()> {
        let photo = match self.photos.get_by_id(id).await {
            Ok(photo) => photo,
            Err(GalleryError::NotFound(_)) => {
                info!("Photo already deleted");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = self
            .objects
            .remove(std::slice::from_ref(&photo.storage_key))
            .await
        {
            warn!(error = %e, "Failed to delete photo file, deleting record anyway");
        }

        self.photos.delete(id).await?;

        metrics::counter!("gallery.photos.deleted").increment(1);
        info!("Photo deleted");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::admin_for_tests;
    use crate::photo_store::{Category, NewPhoto};
    use crate::testing::{
        next_email, MemoryObjectStore, MemoryPhotoStore, RecordingNotifier, SentEmail,
    };
    use std::sync::atomic::Ordering;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Harness {
        service: ModerationService,
        photos: Arc<MemoryPhotoStore>,
        objects: Arc<MemoryObjectStore>,
        emails: UnboundedReceiver<SentEmail>,
    }

    fn harness(notifier_fails: bool) -> Harness {
        let photos = Arc::new(MemoryPhotoStore::default());
        let objects = Arc::new(MemoryObjectStore::default());
        let (notifier, emails) = RecordingNotifier::new(notifier_fails);
        let service = ModerationService::new(
            photos.clone(),
            objects.clone(),
            NotificationDispatcher::new(Arc::new(notifier), vec![], None),
        );
        Harness {
            service,
            photos,
            objects,
            emails,
        }
    }

    async fn pending_photo(h: &Harness, key: &str) -> Photo {
        h.objects.insert_raw(key);
        h.photos
            .insert(NewPhoto {
                title: "x".to_string(),
                description: None,
                category: Category::Hikes,
                storage_key: key.to_string(),
                image_url: h.objects.public_url(key),
                thumbnail_url: h.objects.public_url(key),
                upload_id: "b1".to_string(),
                uploader_name: "Sam".to_string(),
                uploader_email: "sam@example.org".to_string(),
            })
            .await
            .unwrap()
    }

    fn admin() -> AdminIdentity {
        admin_for_tests("leader@example.org")
    }

    #[tokio::test]
    async fn test_approve_moves_file_and_rewrites_urls() {
        let mut h = harness(false);
        let photo = pending_photo(&h, "pending/b1/x.jpg").await;

        let approved = h.service.approve(photo.id, &admin()).await.unwrap();

        assert_eq!(approved.status, PhotoStatus::Approved);
        assert_eq!(approved.storage_key, "approved/b1/x.jpg");
        assert_eq!(approved.image_url, "https://cdn.test/approved/b1/x.jpg");
        assert_eq!(approved.thumbnail_url, approved.image_url);
        assert_eq!(approved.reviewed_by.as_deref(), Some("leader@example.org"));
        assert!(approved.reviewed_at.is_some());
        assert!(!h.objects.contains("pending/b1/x.jpg"));
        assert!(h.objects.contains("approved/b1/x.jpg"));

        let email = next_email(&mut h.emails).await;
        assert_eq!(email.to, "sam@example.org");
        assert_eq!(email.subject, "Your photo is now in the gallery");
    }

    #[tokio::test]
    async fn test_approve_twice_is_idempotent() {
        let h = harness(false);
        let photo = pending_photo(&h, "pending/b1/x.jpg").await;

        h.service.approve(photo.id, &admin()).await.unwrap();
        let again = h.service.approve(photo.id, &admin()).await.unwrap();

        assert_eq!(again.status, PhotoStatus::Approved);
        assert_eq!(again.storage_key, "approved/b1/x.jpg");
        assert_eq!(h.objects.keys(), vec!["approved/b1/x.jpg".to_string()]);
    }

    #[tokio::test]
    async fn test_approve_leaves_foreign_prefix_in_place() {
        let h = harness(false);
        let photo = pending_photo(&h, "legacy/x.jpg").await;

        let approved = h.service.approve(photo.id, &admin()).await.unwrap();

        assert_eq!(approved.storage_key, "legacy/x.jpg");
        assert_eq!(approved.image_url, photo.image_url);
        assert!(h.objects.contains("legacy/x.jpg"));
    }

    #[tokio::test]
    async fn test_approve_with_missing_file_keeps_record_unchanged() {
        let h = harness(false);
        let photo = pending_photo(&h, "pending/b1/x.jpg").await;
        h.objects.remove(&["pending/b1/x.jpg".to_string()]).await.unwrap();

        let err = h.service.approve(photo.id, &admin()).await.unwrap_err();

        assert!(matches!(err, GalleryError::StorageMove { .. }));
        let stored = h.photos.get_by_id(photo.id).await.unwrap();
        assert_eq!(stored, photo);
    }

    #[tokio::test]
    async fn test_reject_deletes_file_and_records_reason() {
        let mut h = harness(false);
        let photo = pending_photo(&h, "pending/b1/x.jpg").await;

        let rejected = h
            .service
            .reject(photo.id, &admin(), Some("blurry"))
            .await
            .unwrap();

        assert_eq!(rejected.status, PhotoStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("blurry"));
        assert!(h.objects.keys().is_empty());

        let email = next_email(&mut h.emails).await;
        assert!(email.body.contains("blurry"));
    }

    #[tokio::test]
    async fn test_reject_with_empty_reason_uses_placeholder() {
        let h = harness(false);
        let photo = pending_photo(&h, "pending/b1/x.jpg").await;

        let rejected = h.service.reject(photo.id, &admin(), Some("  ")).await.unwrap();
        assert_eq!(
            rejected.rejection_reason.as_deref(),
            Some(DEFAULT_REJECTION_REASON)
        );

        let photo = pending_photo(&h, "pending/b1/y.jpg").await;
        let rejected = h.service.reject(photo.id, &admin(), None).await.unwrap();
        assert_eq!(
            rejected.rejection_reason.as_deref(),
            Some(DEFAULT_REJECTION_REASON)
        );
    }

    #[tokio::test]
    async fn test_reject_storage_fault_keeps_record_unchanged() {
        let h = harness(false);
        let photo = pending_photo(&h, "pending/b1/x.jpg").await;
        h.objects.fail_deletes.store(true, Ordering::SeqCst);

        let err = h
            .service
            .reject(photo.id, &admin(), Some("blurry"))
            .await
            .unwrap_err();

        assert!(matches!(err, GalleryError::StorageDelete { .. }));
        assert_eq!(h.photos.get_by_id(photo.id).await.unwrap().status, PhotoStatus::Pending);
    }

    #[tokio::test]
    async fn test_restore_clears_review_fields() {
        let h = harness(false);
        let photo = pending_photo(&h, "pending/b1/x.jpg").await;
        h.service
            .reject(photo.id, &admin(), Some("blurry"))
            .await
            .unwrap();

        let restored = h.service.restore(photo.id, &admin()).await.unwrap();

        assert_eq!(restored.status, PhotoStatus::Pending);
        assert_eq!(restored.rejection_reason, None);
        assert_eq!(restored.reviewed_by, None);
        assert_eq!(restored.reviewed_at, None);
        // the deleted file is not recreated
        assert!(!h.objects.contains(&restored.storage_key));
    }

    #[tokio::test]
    async fn test_restore_refuses_approved_photo() {
        let h = harness(false);
        let photo = pending_photo(&h, "pending/b1/x.jpg").await;
        h.service.approve(photo.id, &admin()).await.unwrap();

        let err = h.service.restore(photo.id, &admin()).await.unwrap_err();

        assert!(matches!(err, GalleryError::Validation(_)));
        assert_eq!(
            h.photos.get_by_id(photo.id).await.unwrap().status,
            PhotoStatus::Approved
        );
    }

    #[tokio::test]
    async fn test_hard_delete_is_idempotent() {
        let h = harness(false);
        let photo = pending_photo(&h, "pending/b1/x.jpg").await;

        h.service.hard_delete(photo.id, &admin()).await.unwrap();
        assert!(h.photos.all().is_empty());
        assert!(h.objects.keys().is_empty());

        h.service.hard_delete(photo.id, &admin()).await.unwrap();
    }

    #[tokio::test]
    async fn test_hard_delete_tolerates_storage_fault() {
        let h = harness(false);
        let photo = pending_photo(&h, "pending/b1/x.jpg").await;
        h.objects.fail_deletes.store(true, Ordering::SeqCst);

        h.service.hard_delete(photo.id, &admin()).await.unwrap();

        assert!(h.photos.all().is_empty());
    }

    #[tokio::test]
    async fn test_missing_photo_is_not_found() {
        let h = harness(false);
        let id = Uuid::new_v4();

        assert!(matches!(
            h.service.approve(id, &admin()).await,
            Err(GalleryError::NotFound(_))
        ));
        assert!(matches!(
            h.service.reject(id, &admin(), None).await,
            Err(GalleryError::NotFound(_))
        ));
        assert!(matches!(
            h.service.restore(id, &admin()).await,
            Err(GalleryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_fail_approval() {
        let mut h = harness(true);
        let photo = pending_photo(&h, "pending/b1/x.jpg").await;

        let approved = h.service.approve(photo.id, &admin()).await.unwrap();

        assert_eq!(approved.status, PhotoStatus::Approved);
        next_email(&mut h.emails).await;
    }
}
