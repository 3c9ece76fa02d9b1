// Test request builder

use gantry_core::{HttpMethod, HttpRequest};
use serde::Serialize;
use uuid::Uuid;

/// Builds an [`HttpRequest`] the way a transport listener would hand it over
#[derive(Debug, Clone)]
pub struct TestRequest {
    request: HttpRequest,
}

impl TestRequest {
    pub fn new(method: HttpMethod, path: &str) -> Self {
        Self {
            request: HttpRequest::new(method.as_str(), path),
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new(HttpMethod::GET, path)
    }

    pub fn post(path: &str) -> Self {
        Self::new(HttpMethod::POST, path)
    }

    pub fn put(path: &str) -> Self {
        Self::new(HttpMethod::PUT, path)
    }

    pub fn patch(path: &str) -> Self {
        Self::new(HttpMethod::PATCH, path)
    }

    pub fn delete(path: &str) -> Self {
        Self::new(HttpMethod::DELETE, path)
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.headers.insert(key.into(), value.into());
        self
    }

    /// `Authorization: Bearer <token>`
    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {}", token))
    }

    /// Tag the request with a fresh `X-Request-Id`
    pub fn request_id(self) -> Self {
        self.header("X-Request-Id", Uuid::new_v4().to_string())
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.query_params.insert(key.into(), value.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.path_params.insert(key.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.request.body = body.into();
        self
    }

    /// Serialize `value` as the body and set the JSON content type
    ///
    /// # Panics
    ///
    /// When `value` cannot be serialized.
    pub fn json<T: Serialize>(mut self, value: &T) -> Self {
        self.request.body = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => panic!("TestRequest::json could not serialize body: {}", e),
        };
        self.header("Content-Type", "application/json")
    }

    pub fn build(self) -> HttpRequest {
        self.request
    }
}

impl From<TestRequest> for HttpRequest {
    fn from(request: TestRequest) -> Self {
        request.build()
    }
}
