//! Testing utilities for Gantry applications.
//!
//! - [`TestRequest`] builds requests the way a transport would deliver them
//! - [`TestClient`] dispatches them into an [`Application`](gantry_core::Application)
//! - [`CallRecorder`] hands out recording guards, interceptors and pipes
//!   that log into one shared, ordered list
//! - `assert_*` helpers check status codes and bodies
//!
//! ```no_run
//! use gantry_core::*;
//! use gantry_testing::*;
//!
//! # tokio_test::block_on(async {
//! let calls = CallRecorder::new();
//! let app = Application::builder()
//!     .module(ModuleDescriptor::new("CatsModule"))
//!     .controller(
//!         ControllerDescriptor::new("CatsController", "CatsModule").handler(
//!             HandlerDescriptor::get("findAll", handler_fn(|_| async {
//!                 Ok(Reply::from(serde_json::json!([])))
//!             }))
//!             .guard(calls.guard("auth", true))
//!             .interceptor(calls.interceptor("timing")),
//!         ),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let client = TestClient::new(app);
//! let response = client.call("CatsController.findAll", TestRequest::get("/cats")).await;
//! assert_status(&response, 200);
//! assert_eq!(calls.calls(), vec!["auth", "timing:pre", "timing:post"]);
//! # });
//! ```

pub mod assertions;
pub mod client;
pub mod recorder;
pub mod request;

pub use assertions::*;
pub use client::TestClient;
pub use recorder::{CallRecorder, RecordingGuard, RecordingInterceptor, RecordingPipe};
pub use request::TestRequest;
