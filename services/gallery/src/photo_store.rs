use crate::config::DatabaseConfig;
use crate::error::{GalleryError, Result};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, QueryBuilder};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Moderation state of a photo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoStatus {
    Pending,
    Approved,
    Rejected,
}

impl PhotoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for PhotoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhotoStatus {
    type Err = GalleryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(GalleryError::validation(format!("Unknown status: {other}"))),
        }
    }
}

/// Gallery category a photo is filed under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Camps,
    Hikes,
    Ceremonies,
    Service,
    Events,
    Other,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Self::Camps,
        Self::Hikes,
        Self::Ceremonies,
        Self::Service,
        Self::Events,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Camps => "camps",
            Self::Hikes => "hikes",
            Self::Ceremonies => "ceremonies",
            Self::Service => "service",
            Self::Events => "events",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = GalleryError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| GalleryError::validation(format!("Unknown category: {}", s.trim())))
    }
}

/// One submitted image and its moderation state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Photo {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category: Category,
    /// Object store key of the full image
    pub storage_key: String,
    pub image_url: String,
    pub thumbnail_url: String,
    /// Batch identifier shared by photos submitted together
    pub upload_id: String,
    pub uploader_name: String,
    pub uploader_email: String,
    pub status: PhotoStatus,
    pub rejection_reason: Option<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Raw row as stored in PostgreSQL
#[derive(Debug, FromRow)]
struct PhotoRow {
    id: Uuid,
    title: String,
    description: Option<String>,
    category: String,
    storage_key: String,
    image_url: String,
    thumbnail_url: String,
    upload_id: String,
    uploader_name: String,
    uploader_email: String,
    status: String,
    rejection_reason: Option<String>,
    reviewed_by: Option<String>,
    reviewed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<PhotoRow> for Photo {
    type Error = GalleryError;

    fn try_from(row: PhotoRow) -> Result<Self> {
        let status = row
            .status
            .parse()
            .map_err(|_| GalleryError::RecordRead(format!("invalid status {:?}", row.status)))?;
        let category = row.category.parse().map_err(|_| {
            GalleryError::RecordRead(format!("invalid category {:?}", row.category))
        })?;

        Ok(Self {
            id: row.id,
            title: row.title,
            description: row.description,
            category,
            storage_key: row.storage_key,
            image_url: row.image_url,
            thumbnail_url: row.thumbnail_url,
            upload_id: row.upload_id,
            uploader_name: row.uploader_name,
            uploader_email: row.uploader_email,
            status,
            rejection_reason: row.rejection_reason,
            reviewed_by: row.reviewed_by,
            reviewed_at: row.reviewed_at,
            created_at: row.created_at,
        })
    }
}

/// Fields supplied when a photo is first recorded; status is always pending
#[derive(Debug, Clone)]
pub struct NewPhoto {
    pub title: String,
    pub description: Option<String>,
    pub category: Category,
    pub storage_key: String,
    pub image_url: String,
    pub thumbnail_url: String,
    pub upload_id: String,
    pub uploader_name: String,
    pub uploader_email: String,
}

/// Partial update. `None` leaves a field untouched; for nullable columns
/// `Some(None)` clears the value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhotoUpdate {
    pub status: Option<PhotoStatus>,
    pub storage_key: Option<String>,
    pub image_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub rejection_reason: Option<Option<String>>,
    pub reviewed_by: Option<Option<String>>,
    pub reviewed_at: Option<Option<DateTime<Utc>>>,
}

impl PhotoUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merge the supplied fields into `photo`
    pub fn apply_to(&self, photo: &mut Photo) {
        if let Some(status) = self.status {
            photo.status = status;
        }
        if let Some(ref key) = self.storage_key {
            photo.storage_key = key.clone();
        }
        if let Some(ref url) = self.image_url {
            photo.image_url = url.clone();
        }
        if let Some(ref url) = self.thumbnail_url {
            photo.thumbnail_url = url.clone();
        }
        if let Some(ref reason) = self.rejection_reason {
            photo.rejection_reason = reason.clone();
        }
        if let Some(ref reviewer) = self.reviewed_by {
            photo.reviewed_by = reviewer.clone();
        }
        if let Some(reviewed_at) = self.reviewed_at {
            photo.reviewed_at = reviewed_at;
        }
    }
}

/// List filter; `None` matches everything
#[derive(Debug, Clone, Default)]
pub struct PhotoFilter {
    pub status: Option<PhotoStatus>,
    pub category: Option<Category>,
}

impl PhotoFilter {
    pub fn matches(&self, photo: &Photo) -> bool {
        self.status.map_or(true, |s| photo.status == s)
            && self.category.map_or(true, |c| photo.category == c)
    }
}

/// 1-indexed page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.max(1),
        }
    }

    pub fn offset(&self) -> i64 {
        (i64::from(self.page) - 1) * i64::from(self.page_size)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }
}

/// One page of photos plus the filtered total
#[derive(Debug, Clone)]
pub struct PhotoPage {
    pub items: Vec<Photo>,
    pub total: i64,
}

/// Photo record store
#[async_trait]
pub trait PhotoRepository: Send + Sync {
    /// Record a new pending photo, assigning its id and creation time
    async fn insert(&self, photo: NewPhoto) -> Result<Photo>;

    async fn get_by_id(&self, id: Uuid) -> Result<Photo>;

    /// Merge `changes` into the stored photo and return the result
    async fn update(&self, id: Uuid, changes: PhotoUpdate) -> Result<Photo>;

    /// Newest first, ties broken by id descending
    async fn list(&self, filter: &PhotoFilter, page: PageRequest) -> Result<PhotoPage>;

    /// Deleting an absent photo is not an error
    async fn delete(&self, id: Uuid) -> Result<()>;

    async fn ping(&self) -> Result<()>;
}

const PHOTO_COLUMNS: &str = "id, title, description, category, storage_key, image_url, \
     thumbnail_url, upload_id, uploader_name, uploader_email, status, \
     rejection_reason, reviewed_by, reviewed_at, created_at";

/// PostgreSQL-backed photo record store
pub struct PgPhotoStore {
    pool: PgPool,
}

impl PgPhotoStore {
    /// Create a new store with connection pool
    pub async fn new(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl PhotoRepository for PgPhotoStore {
    #[instrument(skip(self, photo), fields(upload_id = %photo.upload_id, storage_key = %photo.storage_key))]
    async fn insert(&self, photo: NewPhoto) -> Result<Photo> {
        let sql = format!(
            r#"
            INSERT INTO photos (
                id, title, description, category, storage_key,
                image_url, thumbnail_url, upload_id, uploader_name,
                uploader_email, status, created_at
            ) VALUES (
                $1, $2, $3, $4, $5,
                $6, $7, $8, $9,
                $10, $11, NOW()
            )
            RETURNING {PHOTO_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, PhotoRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(&photo.title)
            .bind(&photo.description)
            .bind(photo.category.as_str())
            .bind(&photo.storage_key)
            .bind(&photo.image_url)
            .bind(&photo.thumbnail_url)
            .bind(&photo.upload_id)
            .bind(&photo.uploader_name)
            .bind(&photo.uploader_email)
            .bind(PhotoStatus::Pending.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| GalleryError::RecordWrite(e.to_string()))?;

        let photo = Photo::try_from(row)?;
        debug!(photo_id = %photo.id, "Photo recorded");
        Ok(photo)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Photo> {
        let sql = format!("SELECT {PHOTO_COLUMNS} FROM photos WHERE id = $1");

        sqlx::query_as::<_, PhotoRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(GalleryError::NotFound(id))
            .and_then(Photo::try_from)
    }

    #[instrument(skip(self, changes), fields(photo_id = %id))]
    async fn update(&self, id: Uuid, changes: PhotoUpdate) -> Result<Photo> {
        if changes.is_empty() {
            return self.get_by_id(id).await;
        }

        let mut builder = QueryBuilder::<Postgres>::new("UPDATE photos SET ");
        {
            let mut set = builder.separated(", ");
            if let Some(status) = changes.status {
                set.push("status = ").push_bind_unseparated(status.as_str());
            }
            if let Some(key) = changes.storage_key {
                set.push("storage_key = ").push_bind_unseparated(key);
            }
            if let Some(url) = changes.image_url {
                set.push("image_url = ").push_bind_unseparated(url);
            }
            if let Some(url) = changes.thumbnail_url {
                set.push("thumbnail_url = ").push_bind_unseparated(url);
            }
            if let Some(reason) = changes.rejection_reason {
                set.push("rejection_reason = ").push_bind_unseparated(reason);
            }
            if let Some(reviewer) = changes.reviewed_by {
                set.push("reviewed_by = ").push_bind_unseparated(reviewer);
            }
            if let Some(reviewed_at) = changes.reviewed_at {
                set.push("reviewed_at = ").push_bind_unseparated(reviewed_at);
            }
        }
        builder.push(" WHERE id = ").push_bind(id);
        builder.push(" RETURNING ").push(PHOTO_COLUMNS);

        let row = builder
            .build_query_as::<PhotoRow>()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| GalleryError::RecordWrite(e.to_string()))?
            .ok_or(GalleryError::NotFound(id))?;

        Photo::try_from(row)
    }

    #[instrument(skip(self))]
    async fn list(&self, filter: &PhotoFilter, page: PageRequest) -> Result<PhotoPage> {
        let status = filter.status.map(|s| s.as_str());
        let category = filter.category.map(|c| c.as_str());

        let sql = format!(
            r#"
            SELECT {PHOTO_COLUMNS}
            FROM photos
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR category = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#
        );

        let rows = sqlx::query_as::<_, PhotoRow>(&sql)
            .bind(status)
            .bind(category)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        let total: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM photos
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR category = $2)
            "#,
        )
        .bind(status)
        .bind(category)
        .fetch_one(&self.pool)
        .await?;

        let items = rows
            .into_iter()
            .map(Photo::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(PhotoPage {
            items,
            total: total.0,
        })
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM photos WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| GalleryError::RecordWrite(e.to_string()))?;

        debug!(photo_id = %id, rows = result.rows_affected(), "Photo record deleted");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_photo() -> Photo {
        Photo {
            id: Uuid::new_v4(),
            title: "campfire".to_string(),
            description: None,
            category: Category::Camps,
            storage_key: "pending/1700000000000/a.jpg".to_string(),
            image_url: "https://cdn.example.org/pending/1700000000000/a.jpg".to_string(),
            thumbnail_url: "https://cdn.example.org/pending/1700000000000/a.jpg".to_string(),
            upload_id: "1700000000000".to_string(),
            uploader_name: "Sam".to_string(),
            uploader_email: "sam@example.org".to_string(),
            status: PhotoStatus::Rejected,
            rejection_reason: Some("blurry".to_string()),
            reviewed_by: Some("leader@example.org".to_string()),
            reviewed_at: Some(Utc::now()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_status_and_category_parsing() {
        assert_eq!("Approved".parse::<PhotoStatus>().unwrap(), PhotoStatus::Approved);
        assert!("archived".parse::<PhotoStatus>().is_err());
        assert_eq!(" hikes ".parse::<Category>().unwrap(), Category::Hikes);
        assert!(matches!(
            "selfies".parse::<Category>(),
            Err(GalleryError::Validation(_))
        ));
    }

    #[test]
    fn test_update_apply_clears_nullable_fields() {
        let mut photo = sample_photo();
        let changes = PhotoUpdate {
            status: Some(PhotoStatus::Pending),
            rejection_reason: Some(None),
            reviewed_by: Some(None),
            reviewed_at: Some(None),
            ..Default::default()
        };

        changes.apply_to(&mut photo);

        assert_eq!(photo.status, PhotoStatus::Pending);
        assert_eq!(photo.rejection_reason, None);
        assert_eq!(photo.reviewed_by, None);
        assert_eq!(photo.reviewed_at, None);
        assert_eq!(photo.title, "campfire");
    }

    #[test]
    fn test_update_is_empty() {
        assert!(PhotoUpdate::default().is_empty());
        let changes = PhotoUpdate {
            rejection_reason: Some(None),
            ..Default::default()
        };
        assert!(!changes.is_empty());
    }

    #[test]
    fn test_page_request_offsets() {
        assert_eq!(PageRequest::new(1, 20).offset(), 0);
        assert_eq!(PageRequest::new(3, 20).offset(), 40);
        // page 0 is treated as the first page
        assert_eq!(PageRequest::new(0, 20), PageRequest::new(1, 20));
    }

    /// Store bound to a fresh schema of the database named by `DATABASE_URL`
    async fn scratch_store() -> PgPhotoStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let schema = format!("gallery_test_{}", Uuid::new_v4().simple());

        let admin = PgPool::connect(&url).await.unwrap();
        sqlx::query(&format!("CREATE SCHEMA {schema}"))
            .execute(&admin)
            .await
            .unwrap();

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .after_connect(move |conn, _meta| {
                let statement = format!("SET search_path TO {schema}");
                Box::pin(async move {
                    sqlx::query(&statement).execute(conn).await?;
                    Ok(())
                })
            })
            .connect(&url)
            .await
            .unwrap();

        let store = PgPhotoStore::from_pool(pool);
        store.run_migrations().await.unwrap();
        store
    }

    fn new_photo(title: &str) -> NewPhoto {
        NewPhoto {
            title: title.to_string(),
            description: Some("Summer camp".to_string()),
            category: Category::Camps,
            storage_key: format!("pending/1700000000000/{title}.jpg"),
            image_url: format!("https://cdn.example.org/pending/1700000000000/{title}.jpg"),
            thumbnail_url: format!("https://cdn.example.org/pending/1700000000000/{title}.jpg"),
            upload_id: "1700000000000".to_string(),
            uploader_name: "Sam".to_string(),
            uploader_email: "sam@example.org".to_string(),
        }
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a scratch PostgreSQL"]
    async fn test_pg_update_sets_and_clears_nullable_fields() {
        let store = scratch_store().await;
        let photo = store.insert(new_photo("lake")).await.unwrap();
        assert_eq!(photo.status, PhotoStatus::Pending);

        let rejected = store
            .update(
                photo.id,
                PhotoUpdate {
                    status: Some(PhotoStatus::Rejected),
                    rejection_reason: Some(Some("blurry".to_string())),
                    reviewed_by: Some(Some("leader@example.org".to_string())),
                    reviewed_at: Some(Some(Utc::now())),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(rejected.rejection_reason.as_deref(), Some("blurry"));
        assert!(rejected.reviewed_at.is_some());

        let restored = store
            .update(
                photo.id,
                PhotoUpdate {
                    status: Some(PhotoStatus::Pending),
                    rejection_reason: Some(None),
                    reviewed_by: Some(None),
                    reviewed_at: Some(None),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(restored.status, PhotoStatus::Pending);
        assert_eq!(restored.rejection_reason, None);
        assert_eq!(restored.reviewed_by, None);
        assert_eq!(restored.reviewed_at, None);
        assert_eq!(restored.title, "lake");
        assert_eq!(store.get_by_id(photo.id).await.unwrap(), restored);

        let missing = store
            .update(
                Uuid::new_v4(),
                PhotoUpdate {
                    status: Some(PhotoStatus::Approved),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(missing, Err(GalleryError::NotFound(_))));
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a scratch PostgreSQL"]
    async fn test_pg_list_orders_newest_first_and_counts_before_paging() {
        let store = scratch_store().await;
        let mut approved = Vec::new();
        for i in 0..5 {
            let photo = store.insert(new_photo(&format!("a{i}"))).await.unwrap();
            let photo = store
                .update(
                    photo.id,
                    PhotoUpdate {
                        status: Some(PhotoStatus::Approved),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
            approved.push(photo);
            store.insert(new_photo(&format!("p{i}"))).await.unwrap();
        }
        approved.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let filter = PhotoFilter {
            status: Some(PhotoStatus::Approved),
            category: Some(Category::Camps),
        };
        let first = store.list(&filter, PageRequest::new(1, 3)).await.unwrap();
        let second = store.list(&filter, PageRequest::new(2, 3)).await.unwrap();

        assert_eq!(first.total, 5);
        assert_eq!(second.total, 5);
        assert_eq!(first.items.len(), 3);
        assert_eq!(second.items.len(), 2);
        let listed: Vec<Uuid> = first
            .items
            .iter()
            .chain(second.items.iter())
            .map(|p| p.id)
            .collect();
        let expected: Vec<Uuid> = approved.iter().map(|p| p.id).collect();
        assert_eq!(listed, expected);

        let hikes = PhotoFilter {
            status: None,
            category: Some(Category::Hikes),
        };
        assert_eq!(store.list(&hikes, PageRequest::new(1, 3)).await.unwrap().total, 0);

        store.delete(expected[0]).await.unwrap();
        store.delete(expected[0]).await.unwrap();
        let after = store.list(&filter, PageRequest::new(1, 10)).await.unwrap();
        assert_eq!(after.total, 4);
    }

    #[test]
    fn test_filter_matches() {
        let photo = sample_photo();
        assert!(PhotoFilter::default().matches(&photo));
        assert!(!PhotoFilter {
            status: Some(PhotoStatus::Approved),
            category: None,
        }
        .matches(&photo));
        assert!(PhotoFilter {
            status: Some(PhotoStatus::Rejected),
            category: Some(Category::Camps),
        }
        .matches(&photo));
    }
}
