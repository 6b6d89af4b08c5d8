//! Scout Troop Photo Gallery Service
//!
//! Members submit photos through a public form, administrators moderate them,
//! and approved photos appear in a public gallery.
//!
//! ## Features
//!
//! - **Submission intake**: Multipart uploads of up to ten images per batch,
//!   with non-images and oversize files skipped rather than failing the batch
//! - **Moderation**: Approve, reject, restore and hard-delete, restricted to an
//!   allow-list of administrator e-mail addresses
//! - **Public listing**: Approved photos only, newest first, without any
//!   submitter contact details
//! - **Notifications**: Best-effort e-mail to administrators and submitters
//!   that never blocks or fails a request
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────┐
//!  POST /photos ────▶│ Submission   │──┐
//!                    └──────────────┘  │      ┌──────────────┐
//!                    ┌──────────────┐  ├─────▶│ S3 bucket    │
//!  /admin/photos ───▶│ Moderation   │──┤      │  pending/    │
//!                    └──────────────┘  │      │  approved/   │
//!                    ┌──────────────┐  │      └──────────────┘
//!  GET /photos ─────▶│ Listing      │──┤      ┌──────────────┐
//!                    └──────────────┘  └─────▶│ PostgreSQL   │
//!                           │                 │  photos      │
//!                           ▼                 └──────────────┘
//!                    ┌──────────────┐
//!                    │ Notification │──────▶ SES
//!                    │ Dispatcher   │
//!                    └──────────────┘
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod listing;
pub mod moderation;
pub mod notifier;
pub mod object_store;
pub mod photo_store;
pub mod submission;

#[cfg(test)]
mod testing;

pub use api::{create_router, start_api_server, AppState};
pub use auth::{AdminIdentity, AdminPolicy, Authenticator, IdentityProvider, JwtIdentityProvider};
pub use config::Config;
pub use error::{GalleryError, Result};
pub use listing::{Listing, ListingService, PublicPhoto};
pub use moderation::{ModerationService, DEFAULT_REJECTION_REASON};
pub use notifier::{NoopNotifier, Notification, NotificationDispatcher, Notifier, SesNotifier};
pub use object_store::{ObjectStore, S3ObjectStore};
pub use photo_store::{Category, PgPhotoStore, Photo, PhotoRepository, PhotoStatus};
pub use submission::{SubmissionForm, SubmissionReceipt, SubmissionService, UploadedFile};
