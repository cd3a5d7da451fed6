//! Handler registry realized as a closed tagged variant rather than runtime
//! introspection of a return value: `Unary` returns a value, `Streaming`
//! drives an `emit(value)` callback instead of a native generator (Rust has
//! no stable generator syntax on the channel this crate targets).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use inferq_core::HandlerError;
use serde_json::Value;
use tokio::sync::mpsc;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Handle passed to a streaming handler body so it can push values without
/// the engine relying on a native generator/coroutine.
#[derive(Clone)]
pub struct StreamEmitter {
    tx: mpsc::Sender<Value>,
}

impl StreamEmitter {
    pub fn new(tx: mpsc::Sender<Value>) -> Self {
        Self { tx }
    }

    /// Emits one value, in order, to the stream consumer. Ordering across
    /// calls is guaranteed by the underlying channel.
    pub async fn emit(&self, value: Value) -> Result<(), HandlerError> {
        self.tx
            .send(value)
            .await
            .map_err(|_| HandlerError::Failed(anyhow::anyhow!("stream receiver dropped")))
    }
}

pub type UnaryFn =
    dyn Fn(Value) -> BoxFuture<'static, Result<Value, HandlerError>> + Send + Sync;
pub type StreamingFn =
    dyn Fn(Value, StreamEmitter) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync;

/// A registered handler body, tagged by whether it streams its result.
#[derive(Clone)]
pub enum Handler {
    Unary(Arc<UnaryFn>),
    Streaming(Arc<StreamingFn>),
}

impl Handler {
    pub fn unary<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        Handler::Unary(Arc::new(move |data| Box::pin(f(data))))
    }

    pub fn streaming<F, Fut>(f: F) -> Self
    where
        F: Fn(Value, StreamEmitter) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        Handler::Streaming(Arc::new(move |data, emitter| Box::pin(f(data, emitter))))
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Handler::Streaming(_))
    }
}

/// Options supplied at `register_task` time.
#[derive(Clone, Debug, Default)]
pub struct HandlerOptions {
    pub timeout: Option<u64>,
    pub stream: bool,
    pub retries: u32,
}

#[derive(Clone)]
pub struct RegisteredHandler {
    pub handler: Handler,
    pub options: HandlerOptions,
}
