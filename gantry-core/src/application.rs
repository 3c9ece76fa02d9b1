//! Application assembly and dispatch.
//!
//! [`ApplicationBuilder::build`] performs every startup check: the module
//! graph and provider registry are validated, controllers are mounted,
//! metadata is frozen and (by default) every singleton is constructed. Any
//! startup error aborts the build, so an [`Application`] that exists is
//! ready to serve.

use crate::exception_filter::{ExceptionFilter, error_response};
use crate::executor::{Dispatch, PipelineExecutor, PipelineOptions};
use crate::handler::{ControllerDescriptor, Enhancers, HandlerDescriptor};
use crate::metadata::{MetadataKey, MetadataStore, MetadataStoreBuilder, Subject};
use crate::pipe::Pipe;
use crate::{Error, Guard, HttpRequest, HttpResponse, Interceptor, ModuleDescriptor, ModuleGraph, Token};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Collects everything an application is made of
#[derive(Default)]
pub struct ApplicationBuilder {
    modules: Vec<ModuleDescriptor>,
    controllers: Vec<ControllerDescriptor>,
    globals: Enhancers,
    metadata: MetadataStoreBuilder,
    metadata_error: Option<Error>,
    options: PipelineOptions,
}

impl ApplicationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module(mut self, module: ModuleDescriptor) -> Self {
        self.modules.push(module);
        self
    }

    pub fn modules<I>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = ModuleDescriptor>,
    {
        self.modules.extend(modules);
        self
    }

    pub fn controller(mut self, controller: ControllerDescriptor) -> Self {
        self.controllers.push(controller);
        self
    }

    pub fn global_guard<G: Guard + 'static>(mut self, guard: G) -> Self {
        self.globals.guards.push(Arc::new(guard));
        self
    }

    pub fn global_interceptor<I: Interceptor + 'static>(mut self, interceptor: I) -> Self {
        self.globals.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn global_pipe<P: Pipe + 'static>(mut self, pipe: P) -> Self {
        self.globals.pipes.push(Arc::new(pipe));
        self
    }

    pub fn global_filter<F: ExceptionFilter + 'static>(mut self, filter: F) -> Self {
        self.globals.filters.push(Arc::new(filter));
        self
    }

    /// Attach metadata to any subject; a second write to the same slot
    /// fails the build
    pub fn metadata<T: Send + Sync + 'static>(
        mut self,
        subject: Subject,
        key: MetadataKey<T>,
        value: T,
    ) -> Self {
        if self.metadata_error.is_none()
            && let Err(e) = self.metadata.set(subject, key, value)
        {
            self.metadata_error = Some(e);
        }
        self
    }

    pub fn options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(mut self) -> Result<Application, Error> {
        if let Some(e) = self.metadata_error.take() {
            return Err(e);
        }

        let graph = Arc::new(ModuleGraph::build(self.modules)?);

        let mut handlers = HashMap::new();
        for controller in self.controllers {
            if !graph.has_module(&controller.module) {
                return Err(Error::UnresolvedDependency(format!(
                    "controller '{}' belongs to undeclared module '{}'",
                    controller.name, controller.module
                )));
            }
            for handler in controller.mount(&mut self.metadata)? {
                check_injections(&graph, &handler)?;
                debug!(handler = %handler.id, module = %handler.module, "Handler mounted");
                let id = handler.id.clone();
                if handlers.insert(id.clone(), Arc::new(handler)).is_some() {
                    return Err(Error::Configuration(format!("duplicate handler id '{}'", id)));
                }
            }
        }

        let metadata = self.metadata.build();
        if self.options.instantiate_eagerly {
            graph.registry().instantiate_singletons()?;
        }

        info!(
            modules = graph.module_order().len(),
            handlers = handlers.len(),
            "Application initialized"
        );

        let executor = PipelineExecutor::new(graph.clone(), metadata.clone(), self.globals, self.options);
        Ok(Application {
            graph,
            metadata,
            handlers: Arc::new(handlers),
            executor: Arc::new(executor),
        })
    }
}

fn check_injections(graph: &ModuleGraph, handler: &HandlerDescriptor) -> Result<(), Error> {
    for token in handler.inject.iter() {
        if !graph.registry().has(token) {
            return Err(Error::UnresolvedDependency(format!(
                "handler '{}' injects undeclared provider '{}'",
                handler.id, token
            )));
        }
    }
    Ok(())
}

/// A validated application, cheap to clone and share across tasks
#[derive(Clone)]
pub struct Application {
    graph: Arc<ModuleGraph>,
    metadata: MetadataStore,
    handlers: Arc<HashMap<String, Arc<HandlerDescriptor>>>,
    executor: Arc<PipelineExecutor>,
}

impl Application {
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    /// Run the pipeline for `handler_id`
    ///
    /// An unknown handler id yields a 404 response.
    pub async fn dispatch(&self, handler_id: &str, request: HttpRequest) -> HttpResponse {
        match self.handlers.get(handler_id) {
            Some(handler) => self.executor.execute(handler.clone(), request).await,
            None => not_found(handler_id),
        }
    }

    /// Like [`Application::dispatch`], but stops as soon as `cancel` fires
    pub async fn dispatch_with_cancel(
        &self,
        handler_id: &str,
        request: HttpRequest,
        cancel: CancellationToken,
    ) -> Dispatch {
        match self.handlers.get(handler_id) {
            Some(handler) => {
                self.executor
                    .execute_with_cancel(handler.clone(), request, cancel)
                    .await
            }
            None => Dispatch::Response(not_found(handler_id)),
        }
    }

    pub fn handler(&self, handler_id: &str) -> Option<&HandlerDescriptor> {
        self.handlers.get(handler_id).map(|handler| handler.as_ref())
    }

    pub fn handler_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn graph(&self) -> &ModuleGraph {
        &self.graph
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn options(&self) -> &PipelineOptions {
        self.executor.options()
    }

    /// Resolve a singleton outside any request
    pub fn get<T: Send + Sync + 'static>(&self, token: impl Into<Token>) -> Result<Arc<T>, Error> {
        self.graph.registry().resolve_as(&token.into(), None)
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("graph", &self.graph)
            .field("handlers", &self.handler_ids())
            .field("executor", &self.executor)
            .finish()
    }
}

fn not_found(handler_id: &str) -> HttpResponse {
    error_response(404, format!("Cannot find handler '{}'", handler_id))
}
