use crate::config::SubmissionConfig;
use crate::error::{GalleryError, Result};
use crate::notifier::{Notification, NotificationDispatcher};
use crate::object_store::{new_batch_id, pending_key, ObjectStore};
use crate::photo_store::{Category, NewPhoto, PhotoRepository};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// One file from a multipart submission
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
    /// Bytes beyond the size ceiling were seen and dropped
    pub oversized: bool,
}

/// Parsed `POST /photos` form; text fields are raw and still unvalidated
#[derive(Debug, Clone, Default)]
pub struct SubmissionForm {
    pub uploader_name: Option<String>,
    pub uploader_email: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub files: Vec<UploadedFile>,
}

/// Result of an accepted submission
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionReceipt {
    pub upload_id: String,
    pub photos_count: usize,
}

/// Why a single file was left out of an otherwise valid submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotAnImage,
    TooLarge,
    Empty,
}

#[derive(Debug)]
struct Submitter {
    name: String,
    email: String,
    category: Category,
    description: Option<String>,
}

/// Accepts anonymous multi-image submissions into the pending queue
pub struct SubmissionService {
    photos: Arc<dyn PhotoRepository>,
    objects: Arc<dyn ObjectStore>,
    notifications: NotificationDispatcher,
    limits: SubmissionConfig,
}

impl SubmissionService {
    pub fn new(
        photos: Arc<dyn PhotoRepository>,
        objects: Arc<dyn ObjectStore>,
        notifications: NotificationDispatcher,
        limits: SubmissionConfig,
    ) -> Self {
        Self {
            photos,
            objects,
            notifications,
            limits,
        }
    }

    pub fn limits(&self) -> &SubmissionConfig {
        &self.limits
    }

    /// Validate, store every acceptable file under the pending prefix and
    /// record one pending photo per file.
    ///
    /// Files that are not images, are empty or exceed the size ceiling are
    /// skipped; the submission fails only when nothing is left.
    #[instrument(skip(self, form), fields(files = form.files.len()))]
    pub async fn submit(&self, form: SubmissionForm) -> Result<SubmissionReceipt> {
        let submitter = validate_submitter(&form)?;

        if form.files.is_empty() {
            return Err(GalleryError::validation("No images attached"));
        }
        if form.files.len() > self.limits.max_files {
            return Err(GalleryError::validation(format!(
                "Maximum {} images per submission",
                self.limits.max_files
            )));
        }

        let upload_id = new_batch_id(Utc::now());
        let mut photos_count = 0;

        for file in form.files {
            if let Some(reason) = skip_reason(&file, &self.limits) {
                debug!(file_name = %file.file_name, ?reason, "Skipping file");
                metrics::counter!("gallery.photos.skipped").increment(1);
                continue;
            }

            let key = pending_key(&upload_id, &file.file_name, &file.content_type);
            let title = title_from_filename(&file.file_name);

            self.objects
                .put(&key, file.data, &file.content_type)
                .await?;
            let url = self.objects.public_url(&key);

            let photo = self
                .photos
                .insert(NewPhoto {
                    title,
                    description: submitter.description.clone(),
                    category: submitter.category,
                    storage_key: key,
                    image_url: url.clone(),
                    thumbnail_url: url,
                    upload_id: upload_id.clone(),
                    uploader_name: submitter.name.clone(),
                    uploader_email: submitter.email.clone(),
                })
                .await?;

            debug!(photo_id = %photo.id, storage_key = %photo.storage_key, "Pending photo stored");
            photos_count += 1;
        }

        if photos_count == 0 {
            return Err(GalleryError::validation("No valid images were uploaded"));
        }

        metrics::counter!("gallery.photos.submitted").increment(photos_count as u64);
        info!(upload_id = %upload_id, photos_count, "Submission accepted");

        self.notifications.dispatch(Notification::NewSubmission {
            upload_id: upload_id.clone(),
            uploader_name: submitter.name,
            uploader_email: submitter.email,
            category: submitter.category.to_string(),
            photos_count,
        });

        Ok(SubmissionReceipt {
            upload_id,
            photos_count,
        })
    }
}

fn validate_submitter(form: &SubmissionForm) -> Result<Submitter> {
    let present = |value: &Option<String>| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let (Some(name), Some(email), Some(category)) = (
        present(&form.uploader_name),
        present(&form.uploader_email),
        present(&form.category),
    ) else {
        return Err(GalleryError::validation(
            "Missing required fields: uploader_name, uploader_email, category",
        ));
    };

    if !looks_like_email(&email) {
        return Err(GalleryError::validation("Invalid email address"));
    }

    Ok(Submitter {
        name,
        email,
        category: category.parse()?,
        description: present(&form.description),
    })
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !domain.contains('@') && !email.contains(' ')
        }
        None => false,
    }
}

/// Per-file acceptance policy
pub fn skip_reason(file: &UploadedFile, limits: &SubmissionConfig) -> Option<SkipReason> {
    if !file.content_type.to_ascii_lowercase().starts_with("image/") {
        Some(SkipReason::NotAnImage)
    } else if file.oversized || file.data.len() > limits.max_file_bytes {
        Some(SkipReason::TooLarge)
    } else if file.data.is_empty() {
        Some(SkipReason::Empty)
    } else {
        None
    }
}

/// Photo title: the original file name without its final extension
pub fn title_from_filename(file_name: &str) -> String {
    let base = file_name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(file_name);
    let stem = match base.rsplit_once('.') {
        Some((stem, _ext)) => stem,
        None => base,
    }
    .trim();

    if stem.is_empty() {
        "Untitled".to_string()
    } else {
        stem.to_string()
    }
}
