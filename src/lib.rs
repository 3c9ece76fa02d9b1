// Gantry - a request pipeline core for Rust
//
// Guards, interceptors, pipes and exception filters around a handler, with
// module-scoped dependency injection and declaration-time metadata.

// Re-export core functionality
pub use gantry_core::*;

// Re-export optional crates
#[cfg(feature = "config")]
pub use gantry_config;

#[cfg(feature = "testing")]
pub use gantry_testing;

// Prelude for common imports
pub mod prelude {
    pub use crate::exception_filter::{TypedFilter, error_response};
    pub use crate::pipe::{DefaultValuePipe, ParseIntPipe, ValidationPipe};
    pub use crate::{
        Application,
        ArgumentMetadata,
        Catch,
        ControllerDescriptor,
        Error,
        ExceptionFilter,
        Guard,
        HandlerDescriptor,
        HttpRequest,
        HttpResponse,
        Interceptor,
        Invocation,
        ModuleDescriptor,
        Next,
        ParamDescriptor,
        Pipe,
        PipelineOptions,
        ProviderDescriptor,
        Reply,
        RequestContext,
        Validate,
        handler_fn,
    };
    pub use async_trait::async_trait;
    pub use serde_json::{Value, json};
}
