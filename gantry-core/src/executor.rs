//! Pipeline executor.
//!
//! Runs one request through the stage sequence
//! `Guarding → PreIntercepting → PipingArguments → Handling →
//! PostIntercepting → Responding`, with `Filtering` reachable from any
//! stage. A guard that says no produces a 403 straight away; any error goes
//! to the exception filters; every non-aborted request ends in a response.

use crate::context::Stage;
use crate::exception_filter::{DefaultExceptionFilter, forbidden_response, handle_error};
use crate::handler::{Arguments, Enhancers, HandlerDescriptor, ParamDescriptor, ParamSource, Reply};
use crate::interceptor::{Endpoint, Next};
use crate::metadata::{HEADERS, HTTP_CODE, MetadataStore};
use crate::pipe::{self, ArgumentMetadata, Pipe};
use crate::{Error, HttpMethod, HttpRequest, HttpResponse, Interceptor, ModuleGraph, RequestContext};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Executor behavior switches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Hide server error detail from clients
    pub production_mode: bool,
    /// Construct every singleton at startup
    pub instantiate_eagerly: bool,
    /// Deadline for the Handling stage
    pub handler_timeout_ms: Option<u64>,
    /// Emit one log line per request
    pub log_requests: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            production_mode: true,
            instantiate_eagerly: true,
            handler_timeout_ms: None,
            log_requests: false,
        }
    }
}

/// Outcome of a cancellable dispatch
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Response(HttpResponse),
    /// The transport went away; nothing is sent
    Aborted,
}

impl Dispatch {
    pub fn is_aborted(&self) -> bool {
        matches!(self, Dispatch::Aborted)
    }

    pub fn into_response(self) -> Option<HttpResponse> {
        match self {
            Dispatch::Response(response) => Some(response),
            Dispatch::Aborted => None,
        }
    }
}

pub struct PipelineExecutor {
    graph: Arc<ModuleGraph>,
    metadata: MetadataStore,
    globals: Enhancers,
    options: PipelineOptions,
    fallback: DefaultExceptionFilter,
}

impl PipelineExecutor {
    pub fn new(
        graph: Arc<ModuleGraph>,
        metadata: MetadataStore,
        globals: Enhancers,
        options: PipelineOptions,
    ) -> Self {
        let fallback = DefaultExceptionFilter::new(options.production_mode);
        Self {
            graph,
            metadata,
            globals,
            options,
            fallback,
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Run the pipeline to completion
    pub async fn execute(&self, handler: Arc<HandlerDescriptor>, request: HttpRequest) -> HttpResponse {
        let context = self.context(handler, request, CancellationToken::new());
        let start = Instant::now();
        let response = self.run(&context).await;
        self.log_completion(&context, &response, start);
        response
    }

    /// Run the pipeline unless `cancel` fires first
    ///
    /// On cancellation no further stage is entered and the request's
    /// per-request providers are released with its context.
    pub async fn execute_with_cancel(
        &self,
        handler: Arc<HandlerDescriptor>,
        request: HttpRequest,
        cancel: CancellationToken,
    ) -> Dispatch {
        let context = self.context(handler, request, cancel.clone());
        let start = Instant::now();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(
                    request_id = %context.id(),
                    handler = %context.handler().id,
                    stage = %context.stage(),
                    "Request aborted"
                );
                Dispatch::Aborted
            }
            response = self.run(&context) => {
                self.log_completion(&context, &response, start);
                Dispatch::Response(response)
            }
        }
    }

    fn context(
        &self,
        handler: Arc<HandlerDescriptor>,
        request: HttpRequest,
        cancel: CancellationToken,
    ) -> RequestContext {
        RequestContext::new(
            request,
            handler,
            self.graph.clone(),
            self.metadata.clone(),
            cancel,
        )
    }

    fn log_completion(&self, context: &RequestContext, response: &HttpResponse, start: Instant) {
        if self.options.log_requests {
            tracing::info!(
                request_id = %context.id(),
                method = %context.request().method,
                path = %context.request().path,
                handler = %context.handler().id,
                status = response.status,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Request handled"
            );
        }
    }

    async fn run(&self, context: &RequestContext) -> HttpResponse {
        match self.run_stages(context).await {
            Ok(response) => response,
            Err(error) => {
                context.enter(Stage::Filtering);
                let handler = context.handler();
                let scopes = [
                    handler.enhancers.filters.as_slice(),
                    handler.controller_enhancers.filters.as_slice(),
                    self.globals.filters.as_slice(),
                ];
                let response = handle_error(scopes, &self.fallback, error, context).await;
                context.enter(Stage::Responding);
                response
            }
        }
    }

    async fn run_stages(&self, context: &RequestContext) -> Result<HttpResponse, Error> {
        context.enter(Stage::Guarding);
        if !self.check_guards(context).await? {
            context.enter(Stage::Responding);
            return Ok(forbidden_response());
        }

        context.enter(Stage::PreIntercepting);
        let handler = context.handler();
        let interceptors: Vec<Arc<dyn Interceptor>> = self
            .globals
            .interceptors
            .iter()
            .chain(&handler.controller_enhancers.interceptors)
            .chain(&handler.enhancers.interceptors)
            .cloned()
            .collect();
        let endpoint: Endpoint<'_> = Box::new(move || self.invoke(context).boxed());
        let reply = Next::new(context, &interceptors, endpoint).run().await?;

        context.enter(Stage::Responding);
        self.respond(context, reply)
    }

    /// Handler guards first, then controller guards, then global guards
    async fn check_guards(&self, context: &RequestContext) -> Result<bool, Error> {
        let handler = context.handler();
        let guards = handler
            .enhancers
            .guards
            .iter()
            .chain(&handler.controller_enhancers.guards)
            .chain(&self.globals.guards);

        for guard in guards {
            if !guard.can_activate(context).await? {
                tracing::debug!(
                    request_id = %context.id(),
                    handler = %handler.id,
                    guard = guard.name(),
                    "Guard denied request"
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn invoke(&self, context: &RequestContext) -> Result<Reply, Error> {
        context.enter(Stage::PipingArguments);
        let args = self.pipe_arguments(context).await?;

        context.enter(Stage::Handling);
        let body = context.handler().body().clone();
        let invocation = context.invocation(args);
        match self.options.handler_timeout_ms {
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), body.handle(invocation))
                .await
                .map_err(|_| Error::RequestTimeout(format!("Handler exceeded {}ms", ms)))?,
            None => body.handle(invocation).await,
        }
    }

    /// Pipe every parameter in declared order; the first failure wins
    async fn pipe_arguments(&self, context: &RequestContext) -> Result<Arguments, Error> {
        let handler = context.handler();
        let mut values = Vec::with_capacity(handler.params.len());

        for (index, param) in handler.params.iter().enumerate() {
            let raw = extract(context, param).await?;
            let metadata = ArgumentMetadata {
                index,
                name: param.name.clone(),
                source: param.source.kind(),
            };
            let pipes: Vec<Arc<dyn Pipe>> = self
                .globals
                .pipes
                .iter()
                .chain(&handler.controller_enhancers.pipes)
                .chain(&handler.enhancers.pipes)
                .chain(&param.pipes)
                .cloned()
                .collect();
            values.push(pipe::apply(&pipes, raw, &metadata).await?);
        }
        Ok(Arguments::new(values))
    }

    fn respond(&self, context: &RequestContext, reply: Reply) -> Result<HttpResponse, Error> {
        let value = match reply {
            Reply::Response(response) => return Ok(response),
            Reply::Value(value) => value,
        };

        // Keyed off the declared method, not the transport's
        let status = context.metadata(HTTP_CODE).copied().unwrap_or_else(|| {
            match context.handler().method {
                HttpMethod::POST => 201,
                _ => 200,
            }
        });

        let mut response = HttpResponse::new(status);
        response = match value {
            Value::Null => response,
            Value::String(text) => response.with_text(text),
            Value::Number(n) => response.with_text(n.to_string()),
            Value::Bool(b) => response.with_text(b.to_string()),
            structured => response.with_json(&structured)?,
        };
        if let Some(headers) = context.metadata(HEADERS) {
            for (name, value) in headers {
                response = response.with_header(name.clone(), value.clone());
            }
        }
        Ok(response)
    }
}

impl std::fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineExecutor")
            .field("options", &self.options)
            .field("global_guards", &self.globals.guards.len())
            .field("global_interceptors", &self.globals.interceptors.len())
            .field("global_pipes", &self.globals.pipes.len())
            .field("global_filters", &self.globals.filters.len())
            .finish()
    }
}

fn parse_body(request: &HttpRequest) -> Result<Value, Error> {
    if request.body.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&request.body)
        .map_err(|e| Error::BadRequest(format!("Malformed JSON body: {}", e)))
}

fn text_or_null(value: Option<&String>) -> Value {
    value.map(|s| Value::String(s.clone())).unwrap_or(Value::Null)
}

/// Raw value for a parameter before any pipe runs
async fn extract(context: &RequestContext, param: &ParamDescriptor) -> Result<Value, Error> {
    let request = context.request();
    match &param.source {
        ParamSource::Body => parse_body(request),
        ParamSource::BodyField(field) => Ok(parse_body(request)?
            .get(field)
            .cloned()
            .unwrap_or(Value::Null)),
        ParamSource::Query(name) => Ok(text_or_null(request.query(name))),
        ParamSource::Path(name) => Ok(text_or_null(request.param(name))),
        ParamSource::Header(name) => Ok(text_or_null(request.header(name))),
        ParamSource::Principal => match context.principal() {
            Some(principal) => Ok(serde_json::to_value(principal)?),
            None => Ok(Value::Null),
        },
        ParamSource::Custom(extractor) => extractor.extract(context).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = PipelineOptions::default();
        assert!(options.production_mode);
        assert!(options.instantiate_eagerly);
        assert_eq!(options.handler_timeout_ms, None);
    }

    #[test]
    fn test_options_deserialize_partial() {
        let options: PipelineOptions =
            serde_json::from_str(r#"{"production_mode": false, "handler_timeout_ms": 250}"#).unwrap();
        assert!(!options.production_mode);
        assert!(options.instantiate_eagerly);
        assert_eq!(options.handler_timeout_ms, Some(250));
    }

    #[test]
    fn test_parse_body() {
        let mut request = HttpRequest::new("POST", "/cats");
        assert_eq!(parse_body(&request).unwrap(), Value::Null);

        request.body = br#"{"name":"Tom"}"#.to_vec();
        assert_eq!(parse_body(&request).unwrap()["name"], "Tom");

        request.body = b"{oops".to_vec();
        assert!(matches!(parse_body(&request), Err(Error::BadRequest(_))));
    }

    #[test]
    fn test_dispatch_helpers() {
        assert!(Dispatch::Aborted.is_aborted());
        assert_eq!(Dispatch::Aborted.into_response(), None);
        assert_eq!(
            Dispatch::Response(HttpResponse::ok()).into_response().map(|r| r.status),
            Some(200)
        );
    }
}
