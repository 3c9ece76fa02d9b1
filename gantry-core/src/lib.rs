// Core library for the Gantry request pipeline
// Provider registry, module graph, metadata store and the staged executor

pub mod application;
pub mod container;
pub mod context;
pub mod error;
pub mod exception_filter;
pub mod executor;
pub mod extensions;
pub mod guard;
pub mod handler;
pub mod http;
pub mod interceptor;
pub mod logging;
pub mod metadata;
pub mod module;
pub mod pipe;
pub mod status;

// Re-export commonly used types
pub use application::*;
pub use container::*;
pub use context::*;
pub use error::*;
pub use exception_filter::{Catch, DefaultExceptionFilter, ErrorMatcher, ExceptionFilter};
pub use executor::{Dispatch, PipelineExecutor, PipelineOptions};
pub use extensions::Extensions;
pub use guard::*;
pub use handler::*;
pub use http::*;
pub use interceptor::{Interceptor, Next};
pub use metadata::{MetadataKey, MetadataStore, MetadataStoreBuilder, Subject};
pub use module::*;
pub use pipe::{ArgumentMetadata, Pipe, Validate};
pub use status::*;
