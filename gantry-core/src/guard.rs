// Guards for admitting or denying requests before any handler logic runs

use crate::metadata::{PUBLIC, ROLES};
use crate::{Error, Principal, RequestContext};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

/// Guard trait for protecting handlers
///
/// `Ok(false)` denies the request with a 403 response; `Err` routes the
/// error to the exception filters.
#[async_trait]
pub trait Guard: Send + Sync {
    /// Determine if the request can proceed
    async fn can_activate(&self, context: &RequestContext) -> Result<bool, Error>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Maps a bearer token to a principal, possibly via a remote lookup
#[async_trait]
pub trait PrincipalResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<Option<Principal>, Error>;
}

#[async_trait]
impl<F> PrincipalResolver for F
where
    F: Fn(&str) -> Option<Principal> + Send + Sync,
{
    async fn resolve(&self, token: &str) -> Result<Option<Principal>, Error> {
        Ok(self(token))
    }
}

/// Authentication guard - resolves the bearer token and attaches the principal
///
/// Handlers marked [`PUBLIC`] pass without a token.
pub struct AuthenticationGuard {
    resolver: Arc<dyn PrincipalResolver>,
}

impl AuthenticationGuard {
    pub fn new<R: PrincipalResolver + 'static>(resolver: R) -> Self {
        Self {
            resolver: Arc::new(resolver),
        }
    }
}

#[async_trait]
impl Guard for AuthenticationGuard {
    async fn can_activate(&self, context: &RequestContext) -> Result<bool, Error> {
        if context.metadata(PUBLIC).copied().unwrap_or(false) {
            return Ok(true);
        }

        let token = match context.request().header("authorization") {
            Some(header) if header.starts_with("Bearer ") => header[7..].trim().to_string(),
            _ => {
                return Err(Error::Unauthorized(
                    "Missing or invalid authorization header".to_string(),
                ));
            }
        };

        match self.resolver.resolve(&token).await? {
            Some(principal) => {
                context.set_principal(principal)?;
                Ok(true)
            }
            None => Err(Error::Unauthorized("Invalid token".to_string())),
        }
    }

    fn name(&self) -> &str {
        "AuthenticationGuard"
    }
}

/// Role-based guard
///
/// Reads [`ROLES`] metadata (handler first, then controller). No declared
/// roles means no restriction; otherwise the attached principal must hold
/// at least one of them.
#[derive(Default)]
pub struct RolesGuard;

impl RolesGuard {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Guard for RolesGuard {
    async fn can_activate(&self, context: &RequestContext) -> Result<bool, Error> {
        let required = match context.metadata(ROLES) {
            Some(roles) if !roles.is_empty() => roles,
            _ => return Ok(true),
        };

        let allowed = context
            .principal()
            .map(|principal| required.iter().any(|role| principal.has_role(role)))
            .unwrap_or(false);

        if !allowed {
            tracing::debug!(handler = %context.handler().id, required = ?required, "Role check failed");
        }
        Ok(allowed)
    }

    fn name(&self) -> &str {
        "RolesGuard"
    }
}

/// API key guard
pub struct ApiKeyGuard {
    header: String,
    valid_keys: HashSet<String>,
}

impl ApiKeyGuard {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            header: "x-api-key".to_string(),
            valid_keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// Read the key from a different header
    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = header.into();
        self
    }
}

#[async_trait]
impl Guard for ApiKeyGuard {
    async fn can_activate(&self, context: &RequestContext) -> Result<bool, Error> {
        Ok(context
            .request()
            .header(&self.header)
            .map(|key| self.valid_keys.contains(key))
            .unwrap_or(false))
    }

    fn name(&self) -> &str {
        "ApiKeyGuard"
    }
}

/// Guard from a synchronous predicate
pub struct FnGuard<F>
where
    F: Fn(&RequestContext) -> Result<bool, Error> + Send + Sync,
{
    predicate: F,
}

impl<F> FnGuard<F>
where
    F: Fn(&RequestContext) -> Result<bool, Error> + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

#[async_trait]
impl<F> Guard for FnGuard<F>
where
    F: Fn(&RequestContext) -> Result<bool, Error> + Send + Sync,
{
    async fn can_activate(&self, context: &RequestContext) -> Result<bool, Error> {
        (self.predicate)(context)
    }
}
