//! Ordered interception pipeline around a single tool call.
//!
//! A [`HookChain`] runs every hook's request phase in caller-supplied
//! order, then the wrapped operation, then every hook's result phase in
//! the same order. A hook may short-circuit the request phase by
//! responding directly; the result phase never short-circuits, so every
//! hook gets a chance to post-process. Hooks are independent: they
//! communicate only through the request and result values passed along
//! the chain.

use async_trait::async_trait;
use http::HeaderMap;
use std::sync::Arc;
use tracing::debug;

use x402_mcp::mcp::{CallToolRequest, CallToolResult};

/// Transport-level context of one inbound call, opaque to the tool itself.
///
/// Carries the request headers so hooks can fall back to header-borne
/// values (e.g. `X-PAYMENT`) when the call metadata lacks them.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub headers: HeaderMap,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_headers(headers: HeaderMap) -> Self {
        Self { headers }
    }
}

/// Request-phase outcome of a single hook.
pub enum RequestHookOutcome {
    /// Pass the (possibly rewritten) request to the next hook, and
    /// ultimately to the operation.
    Continue(CallToolRequest),
    /// Answer the call directly. Later hooks and the operation do not run.
    Respond(CallToolResult),
}

/// One interceptor in the chain: logging, auth, payment gating, analytics.
#[async_trait]
pub trait CallToolHook: Send + Sync {
    /// Runs before the operation. May rewrite the request or short-circuit
    /// with a response.
    async fn process_request(
        &self,
        request: CallToolRequest,
        context: &CallContext,
    ) -> RequestHookOutcome;

    /// Runs after the operation, in the same chain order. Default is a
    /// passthrough.
    async fn process_result(
        &self,
        request: &CallToolRequest,
        context: &CallContext,
        result: CallToolResult,
    ) -> CallToolResult {
        let _ = (request, context);
        result
    }
}

/// An ordered list of hooks wrapping one tool-call execution.
#[derive(Clone, Default)]
pub struct HookChain {
    hooks: Vec<Arc<dyn CallToolHook>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    /// Appends a hook. Order of registration is order of execution for
    /// both phases.
    pub fn with_hook<H: CallToolHook + 'static>(self, hook: H) -> Self {
        self.with_shared_hook(Arc::new(hook))
    }

    /// Appends an already-shared hook.
    pub fn with_shared_hook(mut self, hook: Arc<dyn CallToolHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Runs one call through the chain: request phase in order (stopping at
    /// the first short-circuit), then the operation, then the result phase
    /// in the same order.
    pub async fn dispatch<F, Fut>(
        &self,
        request: CallToolRequest,
        context: &CallContext,
        operation: F,
    ) -> CallToolResult
    where
        F: FnOnce(CallToolRequest) -> Fut,
        Fut: Future<Output = CallToolResult> + Send,
    {
        let mut request = request;
        for hook in &self.hooks {
            match hook.process_request(request, context).await {
                RequestHookOutcome::Continue(next) => request = next,
                RequestHookOutcome::Respond(result) => return result,
            }
        }

        let mut result = operation(request.clone()).await;

        for hook in &self.hooks {
            result = hook.process_result(&request, context, result).await;
        }
        result
    }
}

/// A minimal observability hook: logs the tool name on the way in and the
/// outcome on the way out. Composes with the payment hook in any order.
pub struct TracingHook;

#[async_trait]
impl CallToolHook for TracingHook {
    async fn process_request(
        &self,
        request: CallToolRequest,
        _context: &CallContext,
    ) -> RequestHookOutcome {
        debug!(tool = %request.name, "tool call received");
        RequestHookOutcome::Continue(request)
    }

    async fn process_result(
        &self,
        request: &CallToolRequest,
        _context: &CallContext,
        result: CallToolResult,
    ) -> CallToolResult {
        debug!(tool = %request.name, is_error = result.is_error, "tool call finished");
        result
    }
}
