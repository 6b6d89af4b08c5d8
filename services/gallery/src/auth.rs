//! Bearer credential verification and the administrator allow-list.
//!
//! Every privileged operation takes an [`AdminIdentity`], which can only be
//! produced by [`AdminPolicy::authorize`].

use crate::config::AuthConfig;
use crate::error::{GalleryError, Result};
use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::{header::AUTHORIZATION, request::Parts};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Identity resolved from a bearer credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Opaque account id
    pub id: String,
    /// Contact address
    pub email: String,
}

/// Exchanges a bearer credential for an identity
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<Identity>;
}

/// Claims issued by the hosted auth service
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: usize,
}

/// Verifies HS256 access tokens with the secret shared with the auth service
pub struct JwtIdentityProvider {
    key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityProvider {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        match config.jwt_audience {
            Some(ref audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        Self {
            key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn resolve(&self, token: &str) -> Result<Identity> {
        let data = jsonwebtoken::decode::<AccessClaims>(token, &self.key, &self.validation)
            .map_err(|e| {
                debug!("JWT validation failed: {e}");
                GalleryError::unauthorized("Invalid or expired token")
            })?;

        let email = data
            .claims
            .email
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| GalleryError::unauthorized("Token carries no email"))?;

        Ok(Identity {
            id: data.claims.sub,
            email,
        })
    }
}

/// An identity that passed the administrator check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminIdentity(Identity);

impl AdminIdentity {
    pub fn email(&self) -> &str {
        &self.0.email
    }

    pub fn id(&self) -> &str {
        &self.0.id
    }
}

/// "Is this identity an administrator": a fixed allow-list of contact addresses
#[derive(Debug, Clone, Default)]
pub struct AdminPolicy {
    admins: HashSet<String>,
}

impl AdminPolicy {
    pub fn new<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let admins = emails
            .into_iter()
            .map(|e| normalize_email(e.as_ref()))
            .filter(|e| !e.is_empty())
            .collect();
        Self { admins }
    }

    pub fn is_admin(&self, email: &str) -> bool {
        self.admins.contains(&normalize_email(email))
    }

    pub fn authorize(&self, identity: Identity) -> Result<AdminIdentity> {
        if self.is_admin(&identity.email) {
            Ok(AdminIdentity(identity))
        } else {
            warn!(user_id = %identity.id, "Non-admin attempted a privileged operation");
            Err(GalleryError::unauthorized("Admin access required"))
        }
    }

    /// Allow-listed addresses, sorted, used as recipients of admin e-mails
    pub fn emails(&self) -> Vec<String> {
        let mut emails: Vec<String> = self.admins.iter().cloned().collect();
        emails.sort();
        emails
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

/// Resolves an `Authorization` header into an [`AdminIdentity`]
pub struct Authenticator {
    provider: Arc<dyn IdentityProvider>,
    policy: AdminPolicy,
}

impl Authenticator {
    pub fn new(provider: Arc<dyn IdentityProvider>, policy: AdminPolicy) -> Self {
        Self { provider, policy }
    }

    pub async fn authorize_header(&self, header: Option<&str>) -> Result<AdminIdentity> {
        let header =
            header.ok_or_else(|| GalleryError::unauthorized("Missing Authorization header"))?;
        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GalleryError::unauthorized("Invalid Authorization format"))?;

        let identity = self.provider.resolve(token).await?;
        self.policy.authorize(identity)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AdminIdentity
where
    Arc<Authenticator>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = GalleryError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let authenticator = Arc::<Authenticator>::from_ref(state);
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok());

        authenticator.authorize_header(header).await
    }
}

#[cfg(test)]
pub(crate) fn admin_for_tests(email: &str) -> AdminIdentity {
    AdminIdentity(Identity {
        id: "test-admin".to_string(),
        email: email.to_string(),
    })
}
