//! Handler and controller descriptors.
//!
//! Declarations are plain data built at startup: a [`ControllerDescriptor`]
//! groups [`HandlerDescriptor`]s under one module and carries the
//! controller-level guards, interceptors, pipes, filters and metadata.
//!
//! ```rust
//! use gantry_core::{ControllerDescriptor, HandlerDescriptor, ParamDescriptor, Reply, handler_fn};
//! use gantry_core::pipe::{DefaultValuePipe, ParseIntPipe};
//!
//! let cats = ControllerDescriptor::new("CatsController", "CatsModule").handler(
//!     HandlerDescriptor::get("findAll", handler_fn(|inv| async move {
//!         let page: i64 = inv.args.parse(0)?;
//!         Ok(Reply::from(serde_json::json!({ "page": page })))
//!     }))
//!     .param(
//!         ParamDescriptor::query("page")
//!             .pipe(DefaultValuePipe::new(1))
//!             .pipe(ParseIntPipe),
//!     ),
//! );
//! assert_eq!(cats.handlers().len(), 1);
//! ```

use crate::exception_filter::ExceptionFilter;
use crate::metadata::{HTTP_CODE, HEADERS, MetadataKey, MetadataStoreBuilder, PUBLIC, ROLES, Subject};
use crate::pipe::Pipe;
use crate::{Error, Guard, HttpMethod, HttpResponse, Interceptor, Invocation, RequestContext, Token};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Value produced by a handler (or an interceptor that short-circuits)
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Serialized by the response stage: objects and arrays as JSON,
    /// primitives as-is, null as an empty body
    Value(Value),
    /// Sent verbatim
    Response(HttpResponse),
}

impl Reply {
    /// Serialize any value into a reply
    pub fn json<T: Serialize>(value: &T) -> Result<Self, Error> {
        Ok(Reply::Value(serde_json::to_value(value)?))
    }

    pub fn text(text: impl Into<String>) -> Self {
        Reply::Value(Value::String(text.into()))
    }

    pub fn empty() -> Self {
        Reply::Value(Value::Null)
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Reply::Value(value) => Some(value),
            Reply::Response(_) => None,
        }
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Reply::Value(value)
    }
}

impl From<HttpResponse> for Reply {
    fn from(response: HttpResponse) -> Self {
        Reply::Response(response)
    }
}

/// Piped handler arguments, in declared parameter order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    values: Vec<Value>,
}

impl Arguments {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Deserialize the argument at `index`
    pub fn parse<T: DeserializeOwned>(&self, index: usize) -> Result<T, Error> {
        let value = self.values.get(index).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value)
            .map_err(|e| Error::BadRequest(format!("argument {}: {}", index, e)))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_vec(self) -> Vec<Value> {
        self.values
    }
}

/// Handler body
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, invocation: Invocation) -> Result<Reply, Error>;
}

/// Handler body from an async closure
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> RequestHandler for FnHandler<F>
where
    F: Fn(Invocation) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Reply, Error>> + Send,
{
    async fn handle(&self, invocation: Invocation) -> Result<Reply, Error> {
        (self.f)(invocation).await
    }
}

/// Wrap an async closure as a handler body
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn RequestHandler>
where
    F: Fn(Invocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Reply, Error>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// Produces a custom argument from the request context
#[async_trait]
pub trait ParamExtractor: Send + Sync {
    async fn extract(&self, context: &RequestContext) -> Result<Value, Error>;
}

/// Where a parameter's raw value comes from
#[derive(Clone)]
pub enum ParamSource {
    /// The whole JSON body
    Body,
    /// One top-level field of the JSON body
    BodyField(String),
    Query(String),
    Path(String),
    Header(String),
    /// The authenticated principal, or null
    Principal,
    Custom(Arc<dyn ParamExtractor>),
}

impl ParamSource {
    pub fn kind(&self) -> &'static str {
        match self {
            ParamSource::Body | ParamSource::BodyField(_) => "body",
            ParamSource::Query(_) => "query",
            ParamSource::Path(_) => "path",
            ParamSource::Header(_) => "header",
            ParamSource::Principal => "principal",
            ParamSource::Custom(_) => "custom",
        }
    }
}

impl std::fmt::Debug for ParamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamSource::Body => write!(f, "Body"),
            ParamSource::BodyField(name) => write!(f, "BodyField({})", name),
            ParamSource::Query(name) => write!(f, "Query({})", name),
            ParamSource::Path(name) => write!(f, "Path({})", name),
            ParamSource::Header(name) => write!(f, "Header({})", name),
            ParamSource::Principal => write!(f, "Principal"),
            ParamSource::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// One handler parameter with its pipe chain
#[derive(Clone)]
pub struct ParamDescriptor {
    pub name: String,
    pub source: ParamSource,
    pub pipes: Vec<Arc<dyn Pipe>>,
}

impl ParamDescriptor {
    pub fn new(name: impl Into<String>, source: ParamSource) -> Self {
        Self {
            name: name.into(),
            source,
            pipes: Vec::new(),
        }
    }

    pub fn body() -> Self {
        Self::new("body", ParamSource::Body)
    }

    pub fn body_field(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(name.clone(), ParamSource::BodyField(name))
    }

    pub fn query(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(name.clone(), ParamSource::Query(name))
    }

    pub fn path(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(name.clone(), ParamSource::Path(name))
    }

    pub fn header(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(name.clone(), ParamSource::Header(name))
    }

    pub fn principal() -> Self {
        Self::new("principal", ParamSource::Principal)
    }

    pub fn custom<E: ParamExtractor + 'static>(name: impl Into<String>, extractor: E) -> Self {
        Self::new(name, ParamSource::Custom(Arc::new(extractor)))
    }

    /// Append a pipe; pipes run in the order added
    pub fn pipe<P: Pipe + 'static>(mut self, pipe: P) -> Self {
        self.pipes.push(Arc::new(pipe));
        self
    }

    pub fn pipe_arc(mut self, pipe: Arc<dyn Pipe>) -> Self {
        self.pipes.push(pipe);
        self
    }
}

impl std::fmt::Debug for ParamDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamDescriptor")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("pipes", &self.pipes.len())
            .finish()
    }
}

type MetadataWrite =
    Arc<dyn Fn(&mut MetadataStoreBuilder, &Subject) -> Result<(), Error> + Send + Sync>;

fn metadata_write<T>(key: MetadataKey<T>, value: T) -> MetadataWrite
where
    T: Clone + Send + Sync + 'static,
{
    Arc::new(move |builder, subject| {
        builder.set(subject.clone(), key, value.clone())?;
        Ok(())
    })
}

/// Stage components declared at one level (handler or controller)
#[derive(Clone, Default)]
pub struct Enhancers {
    pub guards: Vec<Arc<dyn Guard>>,
    pub interceptors: Vec<Arc<dyn Interceptor>>,
    pub pipes: Vec<Arc<dyn Pipe>>,
    pub filters: Vec<Arc<dyn ExceptionFilter>>,
}

/// A single handler and its declared pipeline
#[derive(Clone)]
pub struct HandlerDescriptor {
    /// `<controller>.<name>`, assigned when mounted on a controller
    pub id: String,
    pub name: String,
    pub controller: String,
    pub module: String,
    pub method: HttpMethod,
    pub path: String,
    pub params: Vec<ParamDescriptor>,
    /// Tokens resolvable by this handler beyond its module's visibility
    pub inject: Arc<[Token]>,
    pub enhancers: Enhancers,
    pub controller_enhancers: Enhancers,
    handler: Arc<dyn RequestHandler>,
    metadata: Vec<MetadataWrite>,
    headers: Vec<(String, String)>,
}

impl HandlerDescriptor {
    pub fn new(method: HttpMethod, name: impl Into<String>, handler: Arc<dyn RequestHandler>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            controller: String::new(),
            module: String::new(),
            method,
            path: String::new(),
            params: Vec::new(),
            inject: Arc::from(Vec::new()),
            enhancers: Enhancers::default(),
            controller_enhancers: Enhancers::default(),
            handler,
            metadata: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn get(name: impl Into<String>, handler: Arc<dyn RequestHandler>) -> Self {
        Self::new(HttpMethod::GET, name, handler)
    }

    pub fn post(name: impl Into<String>, handler: Arc<dyn RequestHandler>) -> Self {
        Self::new(HttpMethod::POST, name, handler)
    }

    pub fn put(name: impl Into<String>, handler: Arc<dyn RequestHandler>) -> Self {
        Self::new(HttpMethod::PUT, name, handler)
    }

    pub fn patch(name: impl Into<String>, handler: Arc<dyn RequestHandler>) -> Self {
        Self::new(HttpMethod::PATCH, name, handler)
    }

    pub fn delete(name: impl Into<String>, handler: Arc<dyn RequestHandler>) -> Self {
        Self::new(HttpMethod::DELETE, name, handler)
    }

    /// Informational path, routing itself happens outside the core
    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn param(mut self, param: ParamDescriptor) -> Self {
        self.params.push(param);
        self
    }

    pub fn inject(mut self, token: impl Into<Token>) -> Self {
        let mut tokens = self.inject.to_vec();
        tokens.push(token.into());
        self.inject = Arc::from(tokens);
        self
    }

    pub fn guard<G: Guard + 'static>(mut self, guard: G) -> Self {
        self.enhancers.guards.push(Arc::new(guard));
        self
    }

    pub fn interceptor<I: Interceptor + 'static>(mut self, interceptor: I) -> Self {
        self.enhancers.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Pipe applied to every parameter before its own pipes
    pub fn pipe<P: Pipe + 'static>(mut self, pipe: P) -> Self {
        self.enhancers.pipes.push(Arc::new(pipe));
        self
    }

    pub fn filter<F: ExceptionFilter + 'static>(mut self, filter: F) -> Self {
        self.enhancers.filters.push(Arc::new(filter));
        self
    }

    /// Attach arbitrary typed metadata
    pub fn set_metadata<T: Clone + Send + Sync + 'static>(mut self, key: MetadataKey<T>, value: T) -> Self {
        self.metadata.push(metadata_write(key, value));
        self
    }

    pub fn roles<I, S>(self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_metadata(ROLES, roles.into_iter().map(Into::into).collect())
    }

    pub fn http_code(self, status: u16) -> Self {
        self.set_metadata(HTTP_CODE, status)
    }

    pub fn public(self) -> Self {
        self.set_metadata(PUBLIC, true)
    }

    /// Extra response header; may be called repeatedly
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Metadata subjects, most specific first
    pub fn subjects(&self) -> [Subject; 2] {
        [
            Subject::Handler(self.id.clone()),
            Subject::Class(self.controller.clone()),
        ]
    }

    pub fn body(&self) -> &Arc<dyn RequestHandler> {
        &self.handler
    }

    pub(crate) fn write_metadata(&self, builder: &mut MetadataStoreBuilder) -> Result<(), Error> {
        let subject = Subject::Handler(self.id.clone());
        for write in &self.metadata {
            write(builder, &subject)?;
        }
        if !self.headers.is_empty() {
            builder.set(subject, HEADERS, self.headers.clone())?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("id", &self.id)
            .field("module", &self.module)
            .field("method", &self.method)
            .field("params", &self.params)
            .finish()
    }
}

/// A named group of handlers owned by one module
#[derive(Clone)]
pub struct ControllerDescriptor {
    pub name: String,
    pub module: String,
    pub enhancers: Enhancers,
    handlers: Vec<HandlerDescriptor>,
    metadata: Vec<MetadataWrite>,
}

impl ControllerDescriptor {
    pub fn new(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            enhancers: Enhancers::default(),
            handlers: Vec::new(),
            metadata: Vec::new(),
        }
    }

    pub fn handler(mut self, handler: HandlerDescriptor) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn handlers(&self) -> &[HandlerDescriptor] {
        &self.handlers
    }

    pub fn guard<G: Guard + 'static>(mut self, guard: G) -> Self {
        self.enhancers.guards.push(Arc::new(guard));
        self
    }

    pub fn interceptor<I: Interceptor + 'static>(mut self, interceptor: I) -> Self {
        self.enhancers.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn pipe<P: Pipe + 'static>(mut self, pipe: P) -> Self {
        self.enhancers.pipes.push(Arc::new(pipe));
        self
    }

    pub fn filter<F: ExceptionFilter + 'static>(mut self, filter: F) -> Self {
        self.enhancers.filters.push(Arc::new(filter));
        self
    }

    pub fn set_metadata<T: Clone + Send + Sync + 'static>(mut self, key: MetadataKey<T>, value: T) -> Self {
        self.metadata.push(metadata_write(key, value));
        self
    }

    pub fn roles<I, S>(self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_metadata(ROLES, roles.into_iter().map(Into::into).collect())
    }

    pub fn public(self) -> Self {
        self.set_metadata(PUBLIC, true)
    }

    /// Bind handlers to this controller and record its metadata
    pub(crate) fn mount(
        self,
        metadata: &mut MetadataStoreBuilder,
    ) -> Result<Vec<HandlerDescriptor>, Error> {
        let class = Subject::Class(self.name.clone());
        for write in &self.metadata {
            write(metadata, &class)?;
        }

        let mut mounted = Vec::with_capacity(self.handlers.len());
        for mut handler in self.handlers {
            handler.id = format!("{}.{}", self.name, handler.name);
            handler.controller = self.name.clone();
            handler.module = self.module.clone();
            handler.controller_enhancers = self.enhancers.clone();
            handler.write_metadata(metadata)?;
            mounted.push(handler);
        }
        Ok(mounted)
    }
}

impl std::fmt::Debug for ControllerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerDescriptor")
            .field("name", &self.name)
            .field("module", &self.module)
            .field("handlers", &self.handlers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MetadataStore;

    fn noop() -> Arc<dyn RequestHandler> {
        handler_fn(|_| async { Ok(Reply::empty()) })
    }

    #[test]
    fn test_arguments_parse() {
        let args = Arguments::new(vec![serde_json::json!(5), serde_json::json!("x")]);
        assert_eq!(args.parse::<i64>(0).unwrap(), 5);
        assert!(args.parse::<i64>(1).is_err());
        assert_eq!(args.parse::<Option<i64>>(9).unwrap(), None);
    }

    #[test]
    fn test_mount_assigns_ids_and_metadata() {
        let controller = ControllerDescriptor::new("Cats", "CatsModule")
            .roles(["user"])
            .handler(HandlerDescriptor::post("create", noop()).http_code(202))
            .handler(HandlerDescriptor::get("list", noop()));

        let mut builder = MetadataStore::builder();
        let handlers = controller.mount(&mut builder).unwrap();
        let store = builder.build();

        assert_eq!(handlers[0].id, "Cats.create");
        assert_eq!(handlers[1].module, "CatsModule");
        assert_eq!(store.get(&Subject::handler("Cats.create"), HTTP_CODE), Some(&202));
        assert_eq!(
            store.get(&Subject::class("Cats"), ROLES),
            Some(&vec!["user".to_string()])
        );
    }

    #[test]
    fn test_reply_conversions() {
        assert_eq!(Reply::text("hi").as_value(), Some(&Value::String("hi".into())));
        assert!(Reply::from(HttpResponse::ok()).as_value().is_none());
    }
}
