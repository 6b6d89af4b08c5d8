use crate::config::ListingConfig;
use crate::error::Result;
use crate::photo_store::{
    Category, PageRequest, Photo, PhotoFilter, PhotoRepository, PhotoStatus,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Photo as shown on the public gallery; carries no submitter contact or
/// moderation details
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicPhoto {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category: Category,
    pub image_url: String,
    pub thumbnail_url: String,
    pub created_at: DateTime<Utc>,
}

impl From<Photo> for PublicPhoto {
    fn from(p: Photo) -> Self {
        Self {
            id: p.id,
            title: p.title,
            description: p.description,
            category: p.category,
            image_url: p.image_url,
            thumbnail_url: p.thumbnail_url,
            created_at: p.created_at,
        }
    }
}

/// One page of a listing
#[derive(Debug, Clone, Serialize)]
pub struct Listing<T> {
    pub photos: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub total_pages: u32,
}

/// Read paths over the photo store
pub struct ListingService {
    photos: Arc<dyn PhotoRepository>,
    limits: ListingConfig,
}

impl ListingService {
    pub fn new(photos: Arc<dyn PhotoRepository>, limits: ListingConfig) -> Self {
        Self { photos, limits }
    }

    /// Resolve optional query parameters into a page request
    pub fn page_request(&self, page: Option<u32>, limit: Option<u32>) -> PageRequest {
        let max = self.limits.max_page_size.max(1);
        let size = limit
            .unwrap_or(self.limits.default_page_size)
            .clamp(1, max);
        PageRequest::new(page.unwrap_or(1), size)
    }

    /// Approved photos only, newest first
    #[instrument(skip(self))]
    pub async fn public(
        &self,
        category: Option<Category>,
        page: PageRequest,
    ) -> Result<Listing<PublicPhoto>> {
        let filter = PhotoFilter {
            status: Some(PhotoStatus::Approved),
            category,
        };
        let result = self.photos.list(&filter, page).await?;

        Ok(Listing {
            photos: result.items.into_iter().map(PublicPhoto::from).collect(),
            total: result.total,
            page: page.page,
            total_pages: total_pages(result.total, page.page_size),
        })
    }

    /// Photos in any state with every field
    #[instrument(skip(self))]
    pub async fn admin(&self, filter: PhotoFilter, page: PageRequest) -> Result<Listing<Photo>> {
        let result = self.photos.list(&filter, page).await?;

        Ok(Listing {
            photos: result.items,
            total: result.total,
            page: page.page,
            total_pages: total_pages(result.total, page.page_size),
        })
    }
}

/// `ceil(total / page_size)`
pub fn total_pages(total: i64, page_size: u32) -> u32 {
    if total <= 0 || page_size == 0 {
        return 0;
    }
    let page_size = i64::from(page_size);
    u32::try_from((total + page_size - 1) / page_size).unwrap_or(u32::MAX)
}
