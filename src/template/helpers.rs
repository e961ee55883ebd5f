//! Template helpers
//!
//! Helpers are asynchronous so a placeholder can resolve through I/O-backed
//! lookups. They receive positional arguments and `key=value` hash arguments
//! already resolved against the render context.

use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use super::compiled::{is_truthy, stringify};

/// Error returned by a helper
#[derive(Debug, Error)]
pub enum HelperError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Failed(String),
}

pub type HelperResult = Result<Value, HelperError>;

/// An asynchronous template helper
#[async_trait]
pub trait Helper: Send + Sync {
    async fn call(&self, args: &[Value], hash: &Map<String, Value>) -> HelperResult;
}

struct FnHelper<F>(F);

#[async_trait]
impl<F> Helper for FnHelper<F>
where
    F: Fn(&[Value], &Map<String, Value>) -> HelperResult + Send + Sync,
{
    async fn call(&self, args: &[Value], hash: &Map<String, Value>) -> HelperResult {
        (self.0)(args, hash)
    }
}

/// Named helpers available to compiled templates
#[derive(Default, Clone)]
pub struct HelperRegistry {
    helpers: HashMap<String, Arc<dyn Helper>>,
}

impl fmt::Debug for HelperRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.helpers.keys().collect();
        names.sort();
        f.debug_struct("HelperRegistry")
            .field("helpers", &names)
            .finish()
    }
}

impl HelperRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in helpers
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register_fn("upper", upper)
            .register_fn("lower", lower)
            .register_fn("default", default_value)
            .register_fn("json", to_json)
            .register_fn("formatDate", format_date);
        registry
    }

    /// Register an asynchronous helper, replacing any helper with the same name
    pub fn register(&mut self, name: impl Into<String>, helper: impl Helper + 'static) -> &mut Self {
        self.helpers.insert(name.into(), Arc::new(helper));
        self
    }

    /// Register a synchronous function as a helper
    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&[Value], &Map<String, Value>) -> HelperResult + Send + Sync + 'static,
    {
        self.register(name, FnHelper(f))
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Helper>> {
        self.helpers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.helpers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.helpers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.helpers.is_empty()
    }
}

fn first_arg(args: &[Value]) -> &Value {
    args.first().unwrap_or(&Value::Null)
}

fn upper(args: &[Value], _hash: &Map<String, Value>) -> HelperResult {
    Ok(Value::String(stringify(first_arg(args)).to_uppercase()))
}

fn lower(args: &[Value], _hash: &Map<String, Value>) -> HelperResult {
    Ok(Value::String(stringify(first_arg(args)).to_lowercase()))
}

/// First truthy argument, or the last argument when none are
fn default_value(args: &[Value], _hash: &Map<String, Value>) -> HelperResult {
    Ok(args
        .iter()
        .find(|v| is_truthy(v))
        .or_else(|| args.last())
        .cloned()
        .unwrap_or(Value::Null))
}

fn to_json(args: &[Value], _hash: &Map<String, Value>) -> HelperResult {
    serde_json::to_string(first_arg(args))
        .map(Value::String)
        .map_err(|e| HelperError::Failed(e.to_string()))
}

/// `{{formatDate value [pattern]}}` where value is epoch millis or RFC 3339
fn format_date(args: &[Value], hash: &Map<String, Value>) -> HelperResult {
    let pattern = args
        .get(1)
        .or_else(|| hash.get("format"))
        .and_then(Value::as_str)
        .unwrap_or("%Y-%m-%d");

    let timestamp: DateTime<Utc> = match first_arg(args) {
        Value::Null => return Ok(Value::String(String::new())),
        Value::Number(n) => n
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .ok_or_else(|| HelperError::InvalidArgument(format!("timestamp out of range: {}", n)))?,
        Value::String(s) => match s.parse::<i64>() {
            Ok(millis) => DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
                HelperError::InvalidArgument(format!("timestamp out of range: {}", s))
            })?,
            Err(_) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| HelperError::InvalidArgument(format!("not a date: {}", s)))?,
        },
        other => {
            return Err(HelperError::InvalidArgument(format!(
                "not a date: {}",
                other
            )))
        }
    };

    let mut out = String::new();
    write!(out, "{}", timestamp.format(pattern))
        .map_err(|_| HelperError::InvalidArgument(format!("invalid date format '{}'", pattern)))?;
    Ok(Value::String(out))
}
