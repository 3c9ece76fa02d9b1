// In-process test client

use gantry_core::{Application, Dispatch, HttpRequest, HttpResponse};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Dispatches requests straight into an [`Application`], no transport needed
#[derive(Clone)]
pub struct TestClient {
    app: Application,
}

impl TestClient {
    pub fn new(app: Application) -> Self {
        Self { app }
    }

    pub fn app(&self) -> &Application {
        &self.app
    }

    /// Run one request through the handler registered as `handler_id`
    pub async fn call(&self, handler_id: &str, request: impl Into<HttpRequest>) -> HttpResponse {
        self.app.dispatch(handler_id, request.into()).await
    }

    /// Run a request whose transport disconnects after `after`
    pub async fn call_cancelled_after(
        &self,
        handler_id: &str,
        request: impl Into<HttpRequest>,
        after: Duration,
    ) -> Dispatch {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            trigger.cancel();
        });
        let outcome = self
            .app
            .dispatch_with_cancel(handler_id, request.into(), cancel)
            .await;
        timer.abort();
        outcome
    }

    /// Fire `count` copies of a request concurrently and collect the responses
    pub async fn call_concurrently<F>(
        &self,
        handler_id: &str,
        count: usize,
        request: F,
    ) -> Vec<HttpResponse>
    where
        F: Fn(usize) -> HttpRequest,
    {
        let tasks: Vec<_> = (0..count)
            .map(|i| {
                let app = self.app.clone();
                let handler_id = handler_id.to_string();
                let request = request(i);
                tokio::spawn(async move { app.dispatch(&handler_id, request).await })
            })
            .collect();

        let mut responses = Vec::with_capacity(count);
        for task in tasks {
            match task.await {
                Ok(response) => responses.push(response),
                Err(e) => panic!("dispatch task failed: {}", e),
            }
        }
        responses
    }
}

impl From<Application> for TestClient {
    fn from(app: Application) -> Self {
        Self::new(app)
    }
}
