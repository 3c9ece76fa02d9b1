//! Interceptors wrap the rest of the pipeline.
//!
//! Each interceptor receives a [`Next`] and decides whether and when to run
//! it. Code before `next.run()` is pre-processing; code after it sees the
//! reply on the way out, so post-processing happens in reverse order of
//! entry. An interceptor that returns without calling `next.run()`
//! short-circuits: later interceptors, pipes and the handler never run.

use crate::context::Stage;
use crate::handler::Reply;
use crate::{Error, HttpMethod, RequestContext};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Innermost step of the interceptor chain: pipes and the handler
pub type Endpoint<'a> = Box<dyn FnOnce() -> BoxFuture<'a, Result<Reply, Error>> + Send + 'a>;

/// The remainder of the chain after the current interceptor
pub struct Next<'a> {
    context: &'a RequestContext,
    chain: &'a [Arc<dyn Interceptor>],
    endpoint: Endpoint<'a>,
}

impl<'a> Next<'a> {
    pub(crate) fn new(
        context: &'a RequestContext,
        chain: &'a [Arc<dyn Interceptor>],
        endpoint: Endpoint<'a>,
    ) -> Self {
        Self {
            context,
            chain,
            endpoint,
        }
    }

    /// Run the remaining interceptors, then the handler
    pub async fn run(self) -> Result<Reply, Error> {
        match self.chain.split_first() {
            Some((interceptor, rest)) => {
                let next = Next {
                    context: self.context,
                    chain: rest,
                    endpoint: self.endpoint,
                };
                interceptor.intercept(self.context, next).await
            }
            None => {
                let result = (self.endpoint)().await;
                self.context.enter(Stage::PostIntercepting);
                result
            }
        }
    }
}

/// Wraps handler execution
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn intercept(&self, context: &RequestContext, next: Next<'_>) -> Result<Reply, Error>;
}

/// Logs each request with its outcome and elapsed time
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingInterceptor;

#[async_trait]
impl Interceptor for LoggingInterceptor {
    async fn intercept(&self, context: &RequestContext, next: Next<'_>) -> Result<Reply, Error> {
        let start = Instant::now();
        let request = context.request();
        tracing::info!(
            request_id = %context.id(),
            method = %request.method,
            path = %request.path,
            handler = %context.handler().id,
            "Request started"
        );

        let result = next.run().await;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => tracing::info!(request_id = %context.id(), elapsed_ms, "Request completed"),
            Err(e) => tracing::warn!(
                request_id = %context.id(),
                elapsed_ms,
                error = %e,
                "Request failed"
            ),
        }
        result
    }
}

/// Transforms the handler's reply on the way out
pub struct MapInterceptor<F>
where
    F: Fn(Reply) -> Result<Reply, Error> + Send + Sync,
{
    f: F,
}

impl<F> MapInterceptor<F>
where
    F: Fn(Reply) -> Result<Reply, Error> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Interceptor for MapInterceptor<F>
where
    F: Fn(Reply) -> Result<Reply, Error> + Send + Sync,
{
    async fn intercept(&self, _context: &RequestContext, next: Next<'_>) -> Result<Reply, Error> {
        let reply = next.run().await?;
        (self.f)(reply)
    }
}

/// Fails with `RequestTimeout` when the rest of the chain exceeds a deadline
#[derive(Debug, Clone, Copy)]
pub struct TimeoutInterceptor {
    timeout: Duration,
}

impl TimeoutInterceptor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Interceptor for TimeoutInterceptor {
    async fn intercept(&self, context: &RequestContext, next: Next<'_>) -> Result<Reply, Error> {
        match tokio::time::timeout(self.timeout, next.run()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    handler = %context.handler().id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Handler deadline exceeded"
                );
                Err(Error::RequestTimeout(format!(
                    "Request exceeded {}ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }
}

struct CacheEntry {
    reply: Reply,
    expires_at: Instant,
}

/// Caches successful replies of GET handlers for a fixed TTL
///
/// A hit returns the cached reply without running the handler. Keys are the
/// handler id, path and sorted query string.
pub struct CacheInterceptor {
    ttl: Duration,
    entries: Mutex<LruCache<String, CacheEntry>>,
}

impl CacheInterceptor {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    fn key(context: &RequestContext) -> String {
        let request = context.request();
        let mut query: Vec<_> = request.query_params.iter().collect();
        query.sort();
        let query = query
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}:{}?{}", context.handler().id, request.path, query)
    }
}

#[async_trait]
impl Interceptor for CacheInterceptor {
    async fn intercept(&self, context: &RequestContext, next: Next<'_>) -> Result<Reply, Error> {
        if context.handler().method != HttpMethod::GET {
            return next.run().await;
        }

        let key = Self::key(context);
        {
            let mut entries = self.entries.lock();
            match entries.get(&key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    tracing::debug!(key = %key, "Cache hit");
                    return Ok(entry.reply.clone());
                }
                Some(_) => {
                    entries.pop(&key);
                }
                None => {}
            }
        }

        let reply = next.run().await?;
        self.entries.lock().put(
            key,
            CacheEntry {
                reply: reply.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(reply)
    }
}
