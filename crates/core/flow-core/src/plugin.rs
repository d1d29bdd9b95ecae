/*!
# Plugin Invocation Seam

The executor reaches plugins through the [`PluginInvoker`] trait. The
out-of-process host implements it over HTTP; tests and in-process plugins
use [`FnInvoker`] with a closure per call.
*/

use crate::error::{FlowError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Invokes a named method on a plugin.
///
/// Implementations must observe the cancellation token and must not retry
/// on their own — retry is the executor's concern.
#[async_trait]
pub trait PluginInvoker: Send + Sync {
    /// Invoke `method` on `plugin_id` with a JSON payload.
    async fn invoke(
        &self,
        plugin_id: &str,
        method: &str,
        payload: Value,
        cancel: &CancellationToken,
    ) -> Result<Value>;
}

/// Handler function type backing [`FnInvoker`]
pub type InvokeHandler = Arc<
    dyn Fn(String, String, Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>>
        + Send
        + Sync,
>;

/// Closure-backed invoker for tests and in-process plugins
pub struct FnInvoker {
    handler: InvokeHandler,
}

impl FnInvoker {
    /// Wrap a handler; it receives `(plugin_id, method, payload)`
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(String, String, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            handler: Arc::new(move |plugin_id, method, payload| {
                Box::pin(handler(plugin_id, method, payload))
            }),
        }
    }
}

#[async_trait]
impl PluginInvoker for FnInvoker {
    async fn invoke(
        &self,
        plugin_id: &str,
        method: &str,
        payload: Value,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let call = (self.handler)(plugin_id.to_string(), method.to_string(), payload);
        tokio::select! {
            _ = cancel.cancelled() => Err(FlowError::Cancelled),
            result = call => result,
        }
    }
}
