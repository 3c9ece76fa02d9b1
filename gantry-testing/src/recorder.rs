// Recording spies for stage-order assertions

use async_trait::async_trait;
use gantry_core::pipe::{ArgumentMetadata, Pipe};
use gantry_core::{Error, Guard, Interceptor, Next, Reply, RequestContext};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

/// Shared, ordered log of labels pushed by the recording enhancers
///
/// Clones share the same log, so one recorder can be handed to every
/// guard, interceptor and pipe of a test and read back at the end.
#[derive(Debug, Clone, Default)]
pub struct CallRecorder {
    calls: Arc<Mutex<Vec<String>>>,
}

impl CallRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, label: impl Into<String>) {
        self.calls.lock().push(label.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn was_called(&self, label: &str) -> bool {
        self.calls.lock().iter().any(|call| call == label)
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    /// A guard that records `label` and answers `allow`
    pub fn guard(&self, label: impl Into<String>, allow: bool) -> RecordingGuard {
        RecordingGuard {
            label: label.into(),
            allow,
            recorder: self.clone(),
        }
    }

    /// An interceptor that records `<label>:pre` and `<label>:post`
    pub fn interceptor(&self, label: impl Into<String>) -> RecordingInterceptor {
        RecordingInterceptor {
            label: label.into(),
            recorder: self.clone(),
        }
    }

    /// A pipe that records `label` and passes the value through
    pub fn pipe(&self, label: impl Into<String>) -> RecordingPipe {
        RecordingPipe {
            label: label.into(),
            recorder: self.clone(),
        }
    }
}

pub struct RecordingGuard {
    label: String,
    allow: bool,
    recorder: CallRecorder,
}

#[async_trait]
impl Guard for RecordingGuard {
    async fn can_activate(&self, _context: &RequestContext) -> Result<bool, Error> {
        self.recorder.record(self.label.clone());
        Ok(self.allow)
    }
}

pub struct RecordingInterceptor {
    label: String,
    recorder: CallRecorder,
}

#[async_trait]
impl Interceptor for RecordingInterceptor {
    async fn intercept(&self, _context: &RequestContext, next: Next<'_>) -> Result<Reply, Error> {
        self.recorder.record(format!("{}:pre", self.label));
        let reply = next.run().await;
        self.recorder.record(format!("{}:post", self.label));
        reply
    }
}

pub struct RecordingPipe {
    label: String,
    recorder: CallRecorder,
}

#[async_trait]
impl Pipe for RecordingPipe {
    async fn transform(&self, value: Value, _metadata: &ArgumentMetadata) -> Result<Value, Error> {
        self.recorder.record(self.label.clone());
        Ok(value)
    }
}
