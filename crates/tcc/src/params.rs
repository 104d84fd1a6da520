//! Step parameters and the shared per-invocation context.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

/// Reserved context key under which the coordinator publishes the
/// transaction ID of the in-flight execution.
pub const TRANSACTION_ID_KEY: &str = "tcc.transaction_id";

/// Shared mutable context threaded through one chain invocation.
///
/// The context is a string-keyed map of JSON values shared by reference
/// across every node of a single `execute` call. Each invocation owns a
/// fresh context instance; concurrent invocations never share one.
#[derive(Debug, Clone, Default)]
pub struct Context {
    values: Arc<RwLock<HashMap<String, Value>>>,
}

impl Context {
    /// Creates a new empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a clone of the value stored under `key`, if any.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.read().unwrap().get(key).cloned()
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.values
            .write()
            .unwrap()
            .insert(key.into(), value.into());
    }

    /// Removes and returns the value stored under `key`, if any.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.values.write().unwrap().remove(key)
    }

    /// Returns true if a value is stored under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.read().unwrap().contains_key(key)
    }

    /// Returns the number of stored values.
    pub fn len(&self) -> usize {
        self.values.read().unwrap().len()
    }

    /// Returns true if the context holds no values.
    pub fn is_empty(&self) -> bool {
        self.values.read().unwrap().is_empty()
    }
}

/// Input to a single execution unit.
///
/// Carries the previous unit's result as the payload (`Null` at the head
/// of the chain) plus the shared [`Context`]. Deriving the parameter for
/// the next unit via [`StepParameter::next`] replaces the payload and
/// keeps the same context handle.
#[derive(Debug, Clone, Default)]
pub struct StepParameter {
    payload: Value,
    context: Context,
}

impl StepParameter {
    /// Creates a parameter with the given payload and a fresh context.
    pub fn new(payload: impl Into<Value>) -> Self {
        Self {
            payload: payload.into(),
            context: Context::new(),
        }
    }

    /// Creates a parameter with a `Null` payload and a fresh context.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the payload produced by the previous unit.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Returns the shared invocation context.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Derives the parameter for the next unit: new payload, same context.
    pub fn next(&self, result: impl Into<Value>) -> Self {
        Self {
            payload: result.into(),
            context: self.context.clone(),
        }
    }
}
