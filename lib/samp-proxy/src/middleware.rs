//! Request hooks run by the dispatch server around every request

use anyhow::Result;
use hyper::http::request::Parts;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, span, Level};

/// Metadata key under which the server records the decoded RPC method
pub const RPC_METHOD_KEY: &str = "rpc.method";

/// Context passed through middleware chain
#[derive(Clone)]
pub struct MiddlewareContext {
    /// Request path
    pub path: String,
    /// Request method
    pub method: String,
    /// Remote address of the caller
    pub peer: Option<SocketAddr>,
    /// When the server started handling the request
    pub started: Instant,
    /// Custom metadata for middleware
    pub metadata: Arc<Mutex<HashMap<String, String>>>,
}

impl MiddlewareContext {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: method.into(),
            peer: None,
            started: Instant::now(),
            metadata: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create a context from the head of an inbound request
    pub fn from_parts(parts: &Parts, peer: Option<SocketAddr>) -> Self {
        Self {
            path: parts.uri.path().to_string(),
            method: parts.method.to_string(),
            peer,
            started: Instant::now(),
            metadata: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Get a metadata value
    pub fn get_metadata(&self, key: &str) -> Option<String> {
        self.metadata
            .lock()
            .ok()
            .and_then(|m| m.get(key).cloned())
    }

    /// Set a metadata value
    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<String>) {
        if let Ok(mut m) = self.metadata.lock() {
            m.insert(key.into(), value.into());
        }
    }

    /// RPC method of the request, once decoded
    pub fn rpc_method(&self) -> Option<String> {
        self.get_metadata(RPC_METHOD_KEY)
    }
}

/// Middleware trait for observing requests and responses
#[async_trait::async_trait]
pub trait Middleware: Send + Sync {
    /// Name used in log spans
    fn name(&self) -> &'static str {
        "UnnamedMiddleware"
    }

    /// Called before request is processed
    async fn on_request(&self, _context: &MiddlewareContext) -> Result<()> {
        Ok(())
    }

    /// Called after the response status is known
    async fn on_response(&self, _context: &MiddlewareContext, _status: u16) -> Result<()> {
        Ok(())
    }

    /// Called when handling failed
    async fn on_error(&self, _context: &MiddlewareContext, _error: &str) -> Result<()> {
        Ok(())
    }
}

/// Chain of middleware to execute in order
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add middleware to the chain
    pub fn add<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    /// Process request through all middleware
    pub async fn on_request(&self, context: &MiddlewareContext) -> Result<()> {
        for mw in &self.middleware {
            let span = span!(Level::DEBUG, "middleware", name = mw.name());
            let _guard = span.enter();
            mw.on_request(context).await?;
        }
        Ok(())
    }

    /// Process response through all middleware (in reverse order)
    pub async fn on_response(&self, context: &MiddlewareContext, status: u16) -> Result<()> {
        for mw in self.middleware.iter().rev() {
            let span = span!(Level::DEBUG, "middleware", name = mw.name());
            let _guard = span.enter();
            mw.on_response(context, status).await?;
        }
        Ok(())
    }

    /// Process error through all middleware
    pub async fn on_error(&self, context: &MiddlewareContext, error: &str) -> Result<()> {
        for mw in &self.middleware {
            let span = span!(Level::DEBUG, "middleware", name = mw.name());
            let _guard = span.enter();
            mw.on_error(context, error).await?;
        }
        Ok(())
    }
}

/// Logs each request and its outcome
pub struct LoggingMiddleware;

#[async_trait::async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        "LoggingMiddleware"
    }

    async fn on_request(&self, context: &MiddlewareContext) -> Result<()> {
        debug!(
            "Request: {} {} from {}",
            context.method,
            context.path,
            context
                .peer
                .map(|p| p.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        );
        Ok(())
    }

    async fn on_response(&self, context: &MiddlewareContext, status: u16) -> Result<()> {
        debug!(
            "Response: {} {} [{}] -> {} (duration: {}ms)",
            context.method,
            context.path,
            context.rpc_method().unwrap_or_default(),
            status,
            context.started.elapsed().as_millis()
        );
        Ok(())
    }

    async fn on_error(&self, context: &MiddlewareContext, error: &str) -> Result<()> {
        debug!("Error: {} {} - {}", context.method, context.path, error);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::Request;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingMiddleware {
        requests: Arc<AtomicUsize>,
        responses: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Middleware for CountingMiddleware {
        async fn on_request(&self, _context: &MiddlewareContext) -> Result<()> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_response(&self, _context: &MiddlewareContext, _status: u16) -> Result<()> {
            self.responses.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_context_from_parts() {
        let (parts, _) = Request::post("/RPC2")
            .header("content-type", "text/xml")
            .body(())
            .expect("request")
            .into_parts();
        let peer: SocketAddr = "10.0.0.2:5555".parse().expect("addr");
        let context = MiddlewareContext::from_parts(&parts, Some(peer));

        assert_eq!(context.path, "/RPC2");
        assert_eq!(context.method, "POST");
        assert_eq!(context.peer, Some(peer));
        assert_eq!(context.rpc_method(), None);
    }

    #[test]
    fn test_middleware_context_metadata() {
        let context = MiddlewareContext::new("POST", "/");
        context.set_metadata(RPC_METHOD_KEY, "samp.hub.ping");
        assert_eq!(context.rpc_method(), Some("samp.hub.ping".to_string()));
        assert_eq!(context.get_metadata("other"), None);
    }

    #[tokio::test]
    async fn test_middleware_chain_runs_every_hook() {
        let requests = Arc::new(AtomicUsize::new(0));
        let responses = Arc::new(AtomicUsize::new(0));
        let chain = MiddlewareChain::new()
            .add(LoggingMiddleware)
            .add(CountingMiddleware {
                requests: requests.clone(),
                responses: responses.clone(),
            });
        let context = MiddlewareContext::new("GET", "/samp/icon");

        assert!(chain.on_request(&context).await.is_ok());
        assert!(chain.on_response(&context, 200).await.is_ok());
        assert!(chain.on_error(&context, "boom").await.is_ok());
        assert_eq!(requests.load(Ordering::SeqCst), 1);
        assert_eq!(responses.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_chain() {
        let chain = MiddlewareChain::default();
        assert!(chain.is_empty());
        let context = MiddlewareContext::new("GET", "/");
        assert!(chain.on_request(&context).await.is_ok());
    }
}
