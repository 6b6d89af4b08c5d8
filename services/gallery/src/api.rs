use crate::auth::{AdminIdentity, Authenticator};
use crate::config::{ApiConfig, ListingConfig, SubmissionConfig};
use crate::error::{GalleryError, Result};
use crate::listing::{Listing, ListingService, PublicPhoto};
use crate::moderation::ModerationService;
use crate::notifier::NotificationDispatcher;
use crate::object_store::ObjectStore;
use crate::photo_store::{Category, Photo, PhotoFilter, PhotoRepository, PhotoStatus};
use crate::submission::{SubmissionForm, SubmissionService, UploadedFile};
use anyhow::Context;
use axum::{
    extract::{
        multipart::{Field, MultipartRejection},
        rejection::{JsonRejection, QueryRejection},
        DefaultBodyLimit, FromRef, Multipart, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub submissions: Arc<SubmissionService>,
    pub moderation: Arc<ModerationService>,
    pub listings: Arc<ListingService>,
    pub authenticator: Arc<Authenticator>,
    pub photos: Arc<dyn PhotoRepository>,
    pub objects: Arc<dyn ObjectStore>,
}

impl AppState {
    pub fn new(
        photos: Arc<dyn PhotoRepository>,
        objects: Arc<dyn ObjectStore>,
        notifications: NotificationDispatcher,
        authenticator: Authenticator,
        submission: SubmissionConfig,
        listing: ListingConfig,
    ) -> Self {
        Self {
            submissions: Arc::new(SubmissionService::new(
                photos.clone(),
                objects.clone(),
                notifications.clone(),
                submission,
            )),
            moderation: Arc::new(ModerationService::new(
                photos.clone(),
                objects.clone(),
                notifications,
            )),
            listings: Arc::new(ListingService::new(photos.clone(), listing)),
            authenticator: Arc::new(authenticator),
            photos,
            objects,
        }
    }
}

impl FromRef<AppState> for Arc<Authenticator> {
    fn from_ref(state: &AppState) -> Self {
        state.authenticator.clone()
    }
}

/// `POST /photos` response
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub success: bool,
    pub upload_id: String,
    pub photos_count: usize,
}

/// Query parameters for the public gallery
#[derive(Debug, Deserialize)]
pub struct PublicListQuery {
    pub category: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// Query parameters for the moderation queue
#[derive(Debug, Deserialize)]
pub struct AdminListQuery {
    pub status: Option<String>,
    pub category: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// Body of every moderation request
#[derive(Debug, Deserialize)]
pub struct ModerationRequest {
    #[serde(rename = "photoId", alias = "photo_id")]
    pub photo_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ModerationRequest {
    fn id(&self) -> Result<Uuid> {
        let raw = self
            .photo_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GalleryError::validation("Missing photoId"))?;
        Uuid::parse_str(raw).map_err(|_| GalleryError::validation("Invalid photoId"))
    }
}

/// Moderation response
#[derive(Debug, Serialize)]
pub struct ModerationResponse {
    pub success: bool,
    pub photo: Photo,
}

/// Delete response
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    let body_limit = state.submissions.limits().body_limit();

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route(
            "/photos",
            post(submit_photos)
                .get(list_public_photos)
                .options(preflight),
        )
        .route(
            "/admin/photos",
            get(list_admin_photos)
                .delete(delete_photo)
                .options(preflight),
        )
        .route(
            "/admin/photos/approve",
            put(approve_photo).options(preflight),
        )
        .route("/admin/photos/reject", put(reject_photo).options(preflight))
        .route(
            "/admin/photos/restore",
            put(restore_photo).options(preflight),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "gallery-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = state.photos.ping().await;
    let storage = state.objects.ping().await;

    match (database, storage) {
        (Ok(()), Ok(())) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected",
                "storage": "connected"
            })),
        ),
        (database, storage) => {
            warn!(
                database = ?database.as_ref().err(),
                storage = ?storage.as_ref().err(),
                "Readiness check failed"
            );
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "not_ready",
                    "database": if database.is_ok() { "connected" } else { "disconnected" },
                    "storage": if storage.is_ok() { "connected" } else { "disconnected" }
                })),
            )
        }
    }
}

/// Plain OPTIONS requests; CORS preflights are answered by the CORS layer
async fn preflight() -> StatusCode {
    StatusCode::OK
}

/// Accept a multipart photo submission
#[instrument(skip(state, multipart))]
async fn submit_photos(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<SubmitResponse>> {
    let multipart =
        multipart.map_err(|e| GalleryError::validation(format!("Expected multipart form: {e}")))?;
    let form = read_submission_form(multipart, state.submissions.limits()).await?;

    let receipt = state.submissions.submit(form).await?;

    Ok(Json(SubmitResponse {
        success: true,
        upload_id: receipt.upload_id,
        photos_count: receipt.photos_count,
    }))
}

/// Collect text fields and files.
///
/// File bytes past `max_file_bytes` are drained but not kept, and the file is
/// marked oversized. Parsing stops at the first file past `max_files`, whose
/// presence alone fails validation, and when the request body cap is hit
/// inside a file, which is then treated as oversized.
async fn read_submission_form(
    mut multipart: Multipart,
    limits: &SubmissionConfig,
) -> Result<SubmissionForm> {
    let mut form = SubmissionForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| GalleryError::validation(format!("Invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();

        if field.file_name().is_some() || is_file_field(&name) {
            if form.files.len() >= limits.max_files {
                form.files.push(UploadedFile {
                    file_name: field.file_name().unwrap_or_default().to_string(),
                    content_type: String::new(),
                    data: Vec::new(),
                    oversized: false,
                });
                break;
            }

            let (file, body_exhausted) = read_file_field(field, limits.max_file_bytes).await?;
            form.files.push(file);
            if body_exhausted {
                warn!("Request body limit reached inside a file, ignoring the rest of the form");
                break;
            }
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| GalleryError::validation(format!("Failed to read field {name}: {e}")))?;

        match name.as_str() {
            "uploader_name" => form.uploader_name = Some(value),
            "uploader_email" => form.uploader_email = Some(value),
            "category" => form.category = Some(value),
            "description" => form.description = Some(value),
            _ => {}
        }
    }

    Ok(form)
}

/// Stream one file field, keeping at most `max_file_bytes`. The flag is set
/// when the request body cap cut the field short.
async fn read_file_field(
    mut field: Field<'_>,
    max_file_bytes: usize,
) -> Result<(UploadedFile, bool)> {
    let file_name = field.file_name().unwrap_or_default().to_string();
    let content_type = field
        .content_type()
        .unwrap_or("application/octet-stream")
        .to_string();

    let mut data = Vec::new();
    let mut oversized = false;
    let mut body_exhausted = false;

    loop {
        match field.chunk().await {
            Ok(Some(chunk)) => {
                if oversized {
                    continue;
                }
                if data.len() + chunk.len() > max_file_bytes {
                    oversized = true;
                    data = Vec::new();
                } else {
                    data.extend_from_slice(&chunk);
                }
            }
            Ok(None) => break,
            Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                oversized = true;
                data = Vec::new();
                body_exhausted = true;
                break;
            }
            Err(e) => {
                return Err(GalleryError::validation(format!("Failed to read file: {e}")));
            }
        }
    }

    Ok((
        UploadedFile {
            file_name,
            content_type,
            data,
            oversized,
        },
        body_exhausted,
    ))
}

fn is_file_field(name: &str) -> bool {
    matches!(name, "files" | "files[]" | "file")
}

/// Public gallery listing
#[instrument(skip(state))]
async fn list_public_photos(
    State(state): State<AppState>,
    query: std::result::Result<Query<PublicListQuery>, QueryRejection>,
) -> Result<Json<Listing<PublicPhoto>>> {
    let Query(params) = query.map_err(|e| GalleryError::validation(e.body_text()))?;
    let category = parse_optional::<Category>(params.category.as_deref())?;
    let page = state.listings.page_request(params.page, params.limit);

    Ok(Json(state.listings.public(category, page).await?))
}

/// Moderation queue listing
#[instrument(skip(state, admin), fields(reviewer = %admin.email()))]
async fn list_admin_photos(
    State(state): State<AppState>,
    admin: AdminIdentity,
    query: std::result::Result<Query<AdminListQuery>, QueryRejection>,
) -> Result<Json<Listing<Photo>>> {
    let Query(params) = query.map_err(|e| GalleryError::validation(e.body_text()))?;
    let filter = PhotoFilter {
        status: parse_optional::<PhotoStatus>(params.status.as_deref())?,
        category: parse_optional::<Category>(params.category.as_deref())?,
    };
    let page = state.listings.page_request(params.page, params.limit);

    Ok(Json(state.listings.admin(filter, page).await?))
}

#[instrument(skip(state, admin, body))]
async fn approve_photo(
    State(state): State<AppState>,
    admin: AdminIdentity,
    body: std::result::Result<Json<ModerationRequest>, JsonRejection>,
) -> Result<Json<ModerationResponse>> {
    let id = parse_body(body)?.id()?;
    let photo = state.moderation.approve(id, &admin).await?;

    Ok(Json(ModerationResponse {
        success: true,
        photo,
    }))
}

#[instrument(skip(state, admin, body))]
async fn reject_photo(
    State(state): State<AppState>,
    admin: AdminIdentity,
    body: std::result::Result<Json<ModerationRequest>, JsonRejection>,
) -> Result<Json<ModerationResponse>> {
    let request = parse_body(body)?;
    let id = request.id()?;
    let photo = state
        .moderation
        .reject(id, &admin, request.reason.as_deref())
        .await?;

    Ok(Json(ModerationResponse {
        success: true,
        photo,
    }))
}

#[instrument(skip(state, admin, body))]
async fn restore_photo(
    State(state): State<AppState>,
    admin: AdminIdentity,
    body: std::result::Result<Json<ModerationRequest>, JsonRejection>,
) -> Result<Json<ModerationResponse>> {
    let id = parse_body(body)?.id()?;
    let photo = state.moderation.restore(id, &admin).await?;

    Ok(Json(ModerationResponse {
        success: true,
        photo,
    }))
}

#[instrument(skip(state, admin, body))]
async fn delete_photo(
    State(state): State<AppState>,
    admin: AdminIdentity,
    body: std::result::Result<Json<ModerationRequest>, JsonRejection>,
) -> Result<Json<DeleteResponse>> {
    let id = parse_body(body)?.id()?;
    state.moderation.hard_delete(id, &admin).await?;

    Ok(Json(DeleteResponse { success: true }))
}

fn parse_body(
    body: std::result::Result<Json<ModerationRequest>, JsonRejection>,
) -> Result<ModerationRequest> {
    body.map(|Json(request)| request)
        .map_err(|e| GalleryError::validation(e.body_text()))
}

/// Empty query values mean "no filter"
fn parse_optional<T>(raw: Option<&str>) -> Result<Option<T>>
where
    T: std::str::FromStr<Err = GalleryError>,
{
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(value) => value.parse().map(Some),
        None => Ok(None),
    }
}

/// Start the gallery API server, draining in-flight requests once `shutdown`
/// resolves
pub async fn start_api_server<F>(
    state: AppState,
    config: &ApiConfig,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting gallery API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
