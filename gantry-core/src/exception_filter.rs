//! Exception filters turn request-time errors into responses.
//!
//! Filters are declared at handler, controller and global scope and are
//! consulted in that order. Within a scope, a filter matching the error's
//! concrete type beats one matching its variant name, which beats a
//! catch-all; ties go to the higher priority, then to registration order.
//!
//! A filter answers with [`Catch::Handled`], steps aside with
//! [`Catch::Pass`], or replaces the error with [`Catch::Rethrow`] and lets
//! the remaining filters see the new one. Each filter is consulted at most
//! once per request. When nothing handles the error the
//! [`DefaultExceptionFilter`] does, so every request ends in a response.

use crate::{Error, HttpResponse, HttpStatus, RequestContext};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::cmp::Reverse;
use std::marker::PhantomData;
use std::sync::Arc;

/// Outcome of a single filter
#[derive(Debug)]
pub enum Catch {
    Handled(HttpResponse),
    /// Not answered here; try the next filter
    Pass,
    /// Continue down the chain with a different error
    Rethrow(Error),
}

fn is_type<E: std::error::Error + 'static>(error: &Error) -> bool {
    error.downcast_ref::<E>().is_some()
}

/// Which errors a filter declares interest in
#[derive(Clone, Copy)]
pub enum ErrorMatcher {
    /// By variant name, as reported by [`Error::kind`]
    Kind(&'static str),
    /// By concrete application error type carried in [`Error::Custom`]
    Type {
        name: &'static str,
        matches: fn(&Error) -> bool,
    },
}

impl ErrorMatcher {
    pub fn kind(kind: &'static str) -> Self {
        ErrorMatcher::Kind(kind)
    }

    pub fn of<E: std::error::Error + 'static>() -> Self {
        ErrorMatcher::Type {
            name: std::any::type_name::<E>(),
            matches: is_type::<E>,
        }
    }

    pub fn is_match(&self, error: &Error) -> bool {
        match self {
            ErrorMatcher::Kind(kind) => error.kind() == *kind,
            ErrorMatcher::Type { matches, .. } => matches(error),
        }
    }

    fn specificity(&self) -> u8 {
        match self {
            ErrorMatcher::Type { .. } => 2,
            ErrorMatcher::Kind(_) => 1,
        }
    }
}

impl std::fmt::Debug for ErrorMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorMatcher::Kind(kind) => write!(f, "Kind({})", kind),
            ErrorMatcher::Type { name, .. } => write!(f, "Type({})", name),
        }
    }
}

/// Handles errors raised anywhere in the pipeline
#[async_trait]
pub trait ExceptionFilter: Send + Sync {
    /// Errors this filter handles; empty means every error
    fn catches(&self) -> Vec<ErrorMatcher> {
        Vec::new()
    }

    /// Tie-breaker among equally specific filters in one scope
    fn priority(&self) -> i32 {
        0
    }

    async fn catch(&self, error: &Error, context: &RequestContext) -> Catch;
}

/// `None` when the filter does not match; otherwise how specifically it does
fn match_rank(filter: &dyn ExceptionFilter, error: &Error) -> Option<u8> {
    let matchers = filter.catches();
    if matchers.is_empty() {
        return Some(0);
    }
    matchers
        .iter()
        .filter(|matcher| matcher.is_match(error))
        .map(ErrorMatcher::specificity)
        .max()
}

/// Build the standard error body `{statusCode, message, error}`
pub fn error_response(status: u16, message: impl Into<Value>) -> HttpResponse {
    let body = json!({
        "statusCode": status,
        "message": message.into(),
        "error": HttpStatus::reason_for(status),
    });
    HttpResponse::new(status)
        .with_header("Content-Type", "application/json")
        .with_body(serde_json::to_vec(&body).unwrap_or_default())
}

/// Response for a guard that denied the request
pub fn forbidden_response() -> HttpResponse {
    error_response(HttpStatus::Forbidden.code(), "Forbidden resource")
}

/// Run the filter chain over `error`
///
/// `scopes` lists the handler, controller and global filters in that order.
pub(crate) async fn handle_error(
    scopes: [&[Arc<dyn ExceptionFilter>]; 3],
    fallback: &DefaultExceptionFilter,
    mut error: Error,
    context: &RequestContext,
) -> HttpResponse {
    let mut remaining: Vec<(usize, usize, &Arc<dyn ExceptionFilter>)> = scopes
        .iter()
        .enumerate()
        .flat_map(|(scope, filters)| {
            filters
                .iter()
                .enumerate()
                .map(move |(position, filter)| (scope, position, filter))
        })
        .collect();

    loop {
        let best = remaining
            .iter()
            .enumerate()
            .filter_map(|(slot, &(scope, position, filter))| {
                let rank = match_rank(&**filter, &error)?;
                Some((slot, (scope, Reverse(rank), Reverse(filter.priority()), position)))
            })
            .min_by_key(|(_, order)| *order)
            .map(|(slot, _)| slot);

        let Some(slot) = best else {
            return fallback.respond(&error, context);
        };
        let (scope, position, filter) = remaining.remove(slot);
        tracing::debug!(
            request_id = %context.id(),
            error_kind = error.kind(),
            scope,
            position,
            "Exception filter matched"
        );

        match filter.catch(&error, context).await {
            Catch::Handled(response) => return response,
            Catch::Pass => {}
            Catch::Rethrow(next) => error = next,
        }
    }
}

/// Last-resort filter
///
/// HTTP-class errors keep their status and message. Anything else becomes a
/// 500 whose message hides the detail in production mode.
#[derive(Debug, Clone, Copy)]
pub struct DefaultExceptionFilter {
    production_mode: bool,
}

impl DefaultExceptionFilter {
    pub fn new(production_mode: bool) -> Self {
        Self { production_mode }
    }

    pub fn respond(&self, error: &Error, context: &RequestContext) -> HttpResponse {
        if error.is_http_exception() {
            return error_response(error.status_code(), error.message());
        }

        tracing::error!(
            request_id = %context.id(),
            handler = %context.handler().id,
            error_kind = error.kind(),
            error = %error,
            "Unhandled error"
        );
        let message = if self.production_mode {
            "Internal server error".to_string()
        } else {
            error.to_string()
        };
        error_response(error.status_code(), message)
    }
}

impl Default for DefaultExceptionFilter {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl ExceptionFilter for DefaultExceptionFilter {
    async fn catch(&self, error: &Error, context: &RequestContext) -> Catch {
        Catch::Handled(self.respond(error, context))
    }
}

const HTTP_KINDS: &[&str] = &[
    "Forbidden",
    "Validation",
    "BadRequest",
    "Unauthorized",
    "NotFound",
    "Conflict",
    "UnprocessableEntity",
    "RequestTimeout",
    "TooManyRequests",
    "NotImplemented",
    "ServiceUnavailable",
    "Http",
];

/// Answers HTTP-class errors with their own status and message
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpExceptionFilter;

#[async_trait]
impl ExceptionFilter for HttpExceptionFilter {
    fn catches(&self) -> Vec<ErrorMatcher> {
        HTTP_KINDS.iter().copied().map(ErrorMatcher::Kind).collect()
    }

    async fn catch(&self, error: &Error, _context: &RequestContext) -> Catch {
        if error.is_http_exception() {
            Catch::Handled(error_response(error.status_code(), error.message()))
        } else {
            Catch::Pass
        }
    }
}

/// Answers validation failures with 400 and the list of violations
#[derive(Debug, Default, Clone, Copy)]
pub struct ValidationExceptionFilter;

#[async_trait]
impl ExceptionFilter for ValidationExceptionFilter {
    fn catches(&self) -> Vec<ErrorMatcher> {
        vec![ErrorMatcher::Kind("Validation")]
    }

    async fn catch(&self, error: &Error, _context: &RequestContext) -> Catch {
        match error {
            Error::Validation(message) => {
                let violations: Vec<Value> = message
                    .split("; ")
                    .map(|m| Value::String(m.to_string()))
                    .collect();
                Catch::Handled(error_response(
                    HttpStatus::BadRequest.code(),
                    Value::Array(violations),
                ))
            }
            _ => Catch::Pass,
        }
    }
}

/// Filter for one application error type
///
/// ```rust
/// use gantry_core::exception_filter::{Catch, TypedFilter, error_response};
///
/// #[derive(Debug, thiserror::Error)]
/// #[error("out of stock")]
/// struct OutOfStock;
///
/// let filter = TypedFilter::new(|_: &OutOfStock, _| Catch::Handled(error_response(409, "Out of stock")));
/// # let _ = filter;
/// ```
pub struct TypedFilter<E, F> {
    f: F,
    priority: i32,
    _marker: PhantomData<fn(&E)>,
}

impl<E, F> TypedFilter<E, F>
where
    E: std::error::Error + 'static,
    F: Fn(&E, &RequestContext) -> Catch + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            priority: 0,
            _marker: PhantomData,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[async_trait]
impl<E, F> ExceptionFilter for TypedFilter<E, F>
where
    E: std::error::Error + 'static,
    F: Fn(&E, &RequestContext) -> Catch + Send + Sync,
{
    fn catches(&self) -> Vec<ErrorMatcher> {
        vec![ErrorMatcher::of::<E>()]
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn catch(&self, error: &Error, context: &RequestContext) -> Catch {
        match error.downcast_ref::<E>() {
            Some(inner) => (self.f)(inner, context),
            None => Catch::Pass,
        }
    }
}

/// Filter from a closure over the generic error
pub struct FnExceptionFilter<F> {
    f: F,
    matchers: Vec<ErrorMatcher>,
    priority: i32,
}

impl<F> FnExceptionFilter<F>
where
    F: Fn(&Error, &RequestContext) -> Catch + Send + Sync,
{
    /// Catch-all until [`FnExceptionFilter::catching`] narrows it
    pub fn new(f: F) -> Self {
        Self {
            f,
            matchers: Vec::new(),
            priority: 0,
        }
    }

    pub fn catching(mut self, matcher: ErrorMatcher) -> Self {
        self.matchers.push(matcher);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[async_trait]
impl<F> ExceptionFilter for FnExceptionFilter<F>
where
    F: Fn(&Error, &RequestContext) -> Catch + Send + Sync,
{
    fn catches(&self) -> Vec<ErrorMatcher> {
        self.matchers.clone()
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn catch(&self, error: &Error, context: &RequestContext) -> Catch {
        (self.f)(error, context)
    }
}
