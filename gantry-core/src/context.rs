// Per-request execution context

use crate::extensions::Extensions;
use crate::handler::{Arguments, HandlerDescriptor};
use crate::metadata::{MetadataKey, MetadataStore};
use crate::{Error, HttpRequest, Injector, ModuleGraph, RequestScope};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Pipeline stage a request is currently in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Guarding,
    PreIntercepting,
    PipingArguments,
    Handling,
    PostIntercepting,
    Responding,
    Filtering,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Guarding => "guarding",
            Stage::PreIntercepting => "pre-intercepting",
            Stage::PipingArguments => "piping-arguments",
            Stage::Handling => "handling",
            Stage::PostIntercepting => "post-intercepting",
            Stage::Responding => "responding",
            Stage::Filtering => "filtering",
        };
        f.write_str(name)
    }
}

/// Authenticated caller, attached once by an authentication stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            roles: Vec::new(),
        }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// State for one pipeline execution
///
/// Owns the request scope, so every per-request provider built during the
/// request is released when the context is dropped.
pub struct RequestContext {
    id: Uuid,
    request: Arc<HttpRequest>,
    handler: Arc<HandlerDescriptor>,
    metadata: MetadataStore,
    scope: Arc<RequestScope>,
    injector: Injector,
    principal: OnceCell<Principal>,
    attachments: RwLock<Extensions>,
    stage: Mutex<Stage>,
    cancel: CancellationToken,
}

impl RequestContext {
    pub fn new(
        request: HttpRequest,
        handler: Arc<HandlerDescriptor>,
        graph: Arc<ModuleGraph>,
        metadata: MetadataStore,
        cancel: CancellationToken,
    ) -> Self {
        let scope = Arc::new(RequestScope::new());
        let injector = Injector::new(
            graph,
            handler.module.as_str(),
            handler.inject.clone(),
            scope.clone(),
        );
        Self {
            id: Uuid::new_v4(),
            request: Arc::new(request),
            handler,
            metadata,
            scope,
            injector,
            principal: OnceCell::new(),
            attachments: RwLock::new(Extensions::new()),
            stage: Mutex::new(Stage::Guarding),
            cancel,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn handler(&self) -> &HandlerDescriptor {
        &self.handler
    }

    pub fn injector(&self) -> &Injector {
        &self.injector
    }

    pub fn scope(&self) -> &RequestScope {
        &self.scope
    }

    /// Handler-level value, falling back to the controller-level value
    pub fn metadata<T: Send + Sync + 'static>(&self, key: MetadataKey<T>) -> Option<&T> {
        self.metadata
            .get_all_and_override(key, &self.handler.subjects())
    }

    pub fn metadata_store(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.get()
    }

    /// Attach the authenticated principal; the slot can be written once
    pub fn set_principal(&self, principal: Principal) -> Result<(), Error> {
        self.principal
            .set(principal)
            .map_err(|_| Error::Internal("principal already attached to request".to_string()))
    }

    /// Store a typed attachment for later stages
    pub fn attach<T: Send + Sync + 'static>(&self, value: T) {
        self.attachments.write().insert(value);
    }

    pub fn attachment<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.attachments.read().get_arc::<T>()
    }

    pub fn stage(&self) -> Stage {
        *self.stage.lock()
    }

    pub(crate) fn enter(&self, stage: Stage) {
        tracing::trace!(request_id = %self.id, handler = %self.handler.id, stage = %stage, "Entering stage");
        *self.stage.lock() = stage;
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Everything the handler body needs, detached from the context borrow
    pub(crate) fn invocation(&self, args: Arguments) -> Invocation {
        Invocation {
            args,
            injector: self.injector.clone(),
            request: self.request.clone(),
            principal: self.principal.get().cloned(),
            attachments: self.attachments.read().clone(),
            request_id: self.id,
            cancel: self.cancel.clone(),
        }
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("id", &self.id)
            .field("handler", &self.handler.id)
            .field("stage", &self.stage())
            .finish()
    }
}

/// Input to a handler body
pub struct Invocation {
    /// Piped arguments in declared parameter order
    pub args: Arguments,
    pub injector: Injector,
    pub request: Arc<HttpRequest>,
    pub principal: Option<Principal>,
    pub request_id: Uuid,
    pub cancel: CancellationToken,
    attachments: Extensions,
}

impl Invocation {
    /// Resolve a provider visible to the handler's module
    pub fn inject<T: Send + Sync + 'static>(
        &self,
        token: impl Into<crate::Token>,
    ) -> Result<Arc<T>, Error> {
        self.injector.get(token)
    }

    pub fn attachment<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.attachments.get_arc::<T>()
    }
}
