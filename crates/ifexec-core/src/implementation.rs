//! Implementation capability.
//!
//! Anything serving an interface implements [`InterfaceImplementation`].
//! [`FunctionTable`] is the ready-made implementation: a map from function
//! name to a synchronous handler, which returns its result directly, or an
//! asynchronous one, which signals completion later through [`Completion`].

use crate::error::{ExecError, Result};
use crate::request::{RequestContext, ResultBag};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::oneshot;

/// Code serving the functions of one or more interfaces.
#[async_trait]
pub trait InterfaceImplementation: Send + Sync {
    /// Whether `function` is exposed by this implementation.
    fn exposes(&self, function: &str) -> bool;

    /// Run `function` for the call in `req`.
    ///
    /// Result variables may be returned, written through
    /// [`RequestContext::result_mut`], or both; the returned bag wins.
    async fn invoke(&self, function: &str, req: &mut RequestContext) -> Result<ResultBag>;
}

/// Convert a JSON object into a result bag. Anything else yields an empty bag.
pub fn into_bag(value: Value) -> ResultBag {
    match value {
        Value::Object(map) => map,
        _ => ResultBag::new(),
    }
}

/// Completion signal handed to an asynchronous handler.
///
/// Dropping it without signalling fails the call with `InternalError`.
#[derive(Debug)]
pub struct Completion {
    tx: oneshot::Sender<Result<ResultBag>>,
}

impl Completion {
    pub fn success(self, result: ResultBag) {
        let _ = self.tx.send(Ok(result));
    }

    /// Succeed with a JSON object of result variables.
    pub fn success_with(self, result: Value) {
        self.success(into_bag(result))
    }

    pub fn error(self, err: ExecError) {
        let _ = self.tx.send(Err(err));
    }
}

pub type SyncHandler = Box<dyn Fn(&mut RequestContext) -> Result<ResultBag> + Send + Sync>;
pub type AsyncHandler = Box<dyn Fn(&mut RequestContext, Completion) + Send + Sync>;

/// Handler of a single function.
pub enum Handler {
    Sync(SyncHandler),
    Async(AsyncHandler),
}

/// Implementation assembled from per-function handlers.
#[derive(Default)]
pub struct FunctionTable {
    handlers: HashMap<String, Handler>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler that produces its result before returning.
    pub fn sync<F>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(&mut RequestContext) -> Result<ResultBag> + Send + Sync + 'static,
    {
        self.handlers
            .insert(name.to_string(), Handler::Sync(Box::new(handler)));
        self
    }

    /// Add a handler that completes through a [`Completion`], possibly from
    /// another task.
    pub fn asynchronous<F>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(&mut RequestContext, Completion) + Send + Sync + 'static,
    {
        self.handlers
            .insert(name.to_string(), Handler::Async(Box::new(handler)));
        self
    }

    pub fn functions(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

#[async_trait]
impl InterfaceImplementation for FunctionTable {
    fn exposes(&self, function: &str) -> bool {
        self.handlers.contains_key(function)
    }

    async fn invoke(&self, function: &str, req: &mut RequestContext) -> Result<ResultBag> {
        match self.handlers.get(function) {
            Some(Handler::Sync(handler)) => handler(req),
            Some(Handler::Async(handler)) => {
                let (tx, rx) = oneshot::channel();
                handler(req, Completion { tx });
                rx.await.unwrap_or_else(|_| {
                    Err(ExecError::InternalError(format!(
                        "{} completed without a result",
                        function
                    )))
                })
            }
            None => Err(ExecError::InternalError(
                "Missing function implementation".to_string(),
            )),
        }
    }
}

impl std::fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTable")
            .field("functions", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
