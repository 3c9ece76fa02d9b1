//! Argument pipes.
//!
//! A pipe transforms or validates one handler argument. Pipes run in order
//! (global, controller, handler, then the parameter's own pipes) and the
//! first failure stops piping for the whole request.

use crate::Error;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

/// Describes the argument being piped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentMetadata {
    /// Position in the handler's parameter list
    pub index: usize,
    pub name: String,
    /// Where the raw value came from: body, query, path, header, principal, custom
    pub source: &'static str,
}

/// Transforms or validates a single argument
#[async_trait]
pub trait Pipe: Send + Sync {
    async fn transform(&self, value: Value, metadata: &ArgumentMetadata) -> Result<Value, Error>;
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Parses an integer from a string or number
#[derive(Debug, Default, Clone, Copy)]
pub struct ParseIntPipe;

#[async_trait]
impl Pipe for ParseIntPipe {
    async fn transform(&self, value: Value, metadata: &ArgumentMetadata) -> Result<Value, Error> {
        if let Some(n) = value.as_i64() {
            return Ok(Value::from(n));
        }
        as_text(&value)
            .and_then(|text| text.parse::<i64>().ok())
            .map(Value::from)
            .ok_or_else(|| {
                Error::Validation(format!(
                    "Validation failed ('{}' must be a numeric string)",
                    metadata.name
                ))
            })
    }
}

/// Parses a floating point number from a string or number
#[derive(Debug, Default, Clone, Copy)]
pub struct ParseFloatPipe;

#[async_trait]
impl Pipe for ParseFloatPipe {
    async fn transform(&self, value: Value, metadata: &ArgumentMetadata) -> Result<Value, Error> {
        as_text(&value)
            .and_then(|text| text.parse::<f64>().ok())
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| {
                Error::Validation(format!(
                    "Validation failed ('{}' must be a numeric string)",
                    metadata.name
                ))
            })
    }
}

/// Parses `true`/`false` (also `1`/`0`)
#[derive(Debug, Default, Clone, Copy)]
pub struct ParseBoolPipe;

#[async_trait]
impl Pipe for ParseBoolPipe {
    async fn transform(&self, value: Value, metadata: &ArgumentMetadata) -> Result<Value, Error> {
        let parsed = match &value {
            Value::Bool(b) => Some(*b),
            _ => match as_text(&value).as_deref() {
                Some("true") | Some("1") => Some(true),
                Some("false") | Some("0") => Some(false),
                _ => None,
            },
        };
        parsed.map(Value::Bool).ok_or_else(|| {
            Error::Validation(format!(
                "Validation failed ('{}' must be a boolean string)",
                metadata.name
            ))
        })
    }
}

/// Checks that the value is a UUID and normalizes it to lowercase hyphenated form
#[derive(Debug, Default, Clone, Copy)]
pub struct ParseUuidPipe;

#[async_trait]
impl Pipe for ParseUuidPipe {
    async fn transform(&self, value: Value, metadata: &ArgumentMetadata) -> Result<Value, Error> {
        value
            .as_str()
            .and_then(|s| uuid::Uuid::parse_str(s.trim()).ok())
            .map(|id| Value::String(id.hyphenated().to_string()))
            .ok_or_else(|| {
                Error::Validation(format!(
                    "Validation failed ('{}' must be a UUID)",
                    metadata.name
                ))
            })
    }
}

/// Substitutes a default when the value is absent (null)
#[derive(Debug, Clone)]
pub struct DefaultValuePipe {
    default: Value,
}

impl DefaultValuePipe {
    pub fn new(default: impl Into<Value>) -> Self {
        Self {
            default: default.into(),
        }
    }
}

#[async_trait]
impl Pipe for DefaultValuePipe {
    async fn transform(&self, value: Value, _metadata: &ArgumentMetadata) -> Result<Value, Error> {
        if value.is_null() {
            Ok(self.default.clone())
        } else {
            Ok(value)
        }
    }
}

/// Splits a delimited string into an array, optionally piping each item
pub struct ParseArrayPipe {
    separator: String,
    item: Option<Arc<dyn Pipe>>,
}

impl ParseArrayPipe {
    pub fn new() -> Self {
        Self {
            separator: ",".to_string(),
            item: None,
        }
    }

    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Run every element through `pipe`
    pub fn items<P: Pipe + 'static>(mut self, pipe: P) -> Self {
        self.item = Some(Arc::new(pipe));
        self
    }
}

impl Default for ParseArrayPipe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Pipe for ParseArrayPipe {
    async fn transform(&self, value: Value, metadata: &ArgumentMetadata) -> Result<Value, Error> {
        let items = match value {
            Value::Array(items) => items,
            Value::String(s) if s.is_empty() => Vec::new(),
            Value::String(s) => s
                .split(self.separator.as_str())
                .map(|part| Value::String(part.trim().to_string()))
                .collect(),
            _ => {
                return Err(Error::Validation(format!(
                    "Validation failed ('{}' must be an array or delimited string)",
                    metadata.name
                )));
            }
        };

        let Some(pipe) = &self.item else {
            return Ok(Value::Array(items));
        };
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(pipe.transform(item, metadata).await?);
        }
        Ok(Value::Array(out))
    }
}

/// Domain validation for a deserialized argument
pub trait Validate {
    /// Every violated rule, as a human-readable message
    fn validate(&self) -> Result<(), Vec<String>>;
}

/// Deserializes the value into `T` and runs its [`Validate`] rules
///
/// Failures carry every violation joined with `"; "`.
pub struct ValidationPipe<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> ValidationPipe<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for ValidationPipe<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> Pipe for ValidationPipe<T>
where
    T: DeserializeOwned + Validate + Send + 'static,
{
    async fn transform(&self, value: Value, metadata: &ArgumentMetadata) -> Result<Value, Error> {
        let parsed: T = serde_json::from_value(value.clone()).map_err(|e| {
            Error::Validation(format!("'{}' is malformed: {}", metadata.name, e))
        })?;
        parsed
            .validate()
            .map_err(|violations| Error::Validation(violations.join("; ")))?;
        Ok(value)
    }
}

/// Pipe from a synchronous closure
pub struct FnPipe<F>
where
    F: Fn(Value, &ArgumentMetadata) -> Result<Value, Error> + Send + Sync,
{
    f: F,
}

impl<F> FnPipe<F>
where
    F: Fn(Value, &ArgumentMetadata) -> Result<Value, Error> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Pipe for FnPipe<F>
where
    F: Fn(Value, &ArgumentMetadata) -> Result<Value, Error> + Send + Sync,
{
    async fn transform(&self, value: Value, metadata: &ArgumentMetadata) -> Result<Value, Error> {
        (self.f)(value, metadata)
    }
}

/// Run `value` through `pipes` in order, stopping at the first failure
pub async fn apply(
    pipes: &[Arc<dyn Pipe>],
    mut value: Value,
    metadata: &ArgumentMetadata,
) -> Result<Value, Error> {
    for pipe in pipes {
        value = pipe.transform(value, metadata).await?;
    }
    Ok(value)
}
