//! Concurrent XML-RPC dispatch server
//!
//! Every accepted connection runs on its own tokio task. POSTed calls are
//! decoded, stamped with caller provenance and handed to a [`Dispatcher`];
//! with a [`WebAccess`] attached the server also speaks the web profile
//! (policy documents, CORS and the translator).

use crate::auth::{basic_user, AccessGate, OpenAccess, REALM};
use crate::compression::{gzip_encode, should_compress};
use crate::metrics::{MetricsCollector, MetricsMiddleware};
use crate::middleware::{MiddlewareChain, MiddlewareContext, RPC_METHOD_KEY};
use crate::tls::TlsServerConfig;
use crate::web::{apply_cors, policy_document, WebAccess};
use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes};
use hyper::header::{
    HeaderName, HeaderValue, ACCEPT_ENCODING, ACCESS_CONTROL_REQUEST_METHOD, CONTENT_ENCODING,
    CONTENT_LENGTH, CONTENT_TYPE, ORIGIN, WWW_AUTHENTICATE,
};
use hyper::http::request::Parts;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use samp_core::codec::{decode_call, encode_fault, encode_response};
use samp_core::constants::{
    DELIVERY_METHODS, HUB_CALL_AND_WAIT, ICON_CONTENT_TYPE, ICON_PATH, WEBHUB_REGISTER,
};
use samp_core::{constants, CoreError, Fault, Result, Value};
use std::convert::Infallible;
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

const X_EXCEPTION: HeaderName = HeaderName::from_static("x-exception");
const X_TRACEBACK: HeaderName = HeaderName::from_static("x-traceback");

/// Dispatch server settings
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Paths accepting XML-RPC POSTs
    pub rpc_paths: Vec<String>,
    /// Increment in which request bodies are buffered
    pub max_chunk_size: usize,
    /// Largest request body accepted
    pub max_body_size: usize,
    /// Responses longer than this are gzip-encoded when the client allows it
    pub encode_threshold: Option<usize>,
    /// Attach `X-exception` / `X-traceback` headers to 500 responses
    pub send_traceback_header: bool,
    /// Serve Prometheus metrics here (standard profile only)
    pub metrics_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            rpc_paths: vec!["/".to_string(), "/RPC2".to_string()],
            max_chunk_size: 10 * 1024 * 1024,
            max_body_size: 64 * 1024 * 1024,
            encode_threshold: Some(1400),
            send_traceback_header: false,
            metrics_path: None,
        }
    }
}

/// Who made an inbound call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallerContext {
    pub peer: SocketAddr,
    /// Basic-Auth user name, when credentials were sent
    pub user: Option<String>,
    pub origin: Option<String>,
    pub path: String,
}

/// Executes decoded calls
///
/// Returning `CoreError::Fault` produces an XML-RPC fault; any other error
/// is reported as an HTTP 500.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, method: &str, params: Vec<Value>, caller: &CallerContext) -> Result<Value>;
}

/// XML-RPC dispatch server
#[derive(Clone)]
pub struct DispatchServer {
    config: Arc<ServerConfig>,
    dispatcher: Arc<dyn Dispatcher>,
    gate: Arc<dyn AccessGate>,
    tls: Option<TlsServerConfig>,
    middleware: MiddlewareChain,
    web: Option<WebAccess>,
    metrics: Option<MetricsCollector>,
}

impl DispatchServer {
    pub fn new(config: ServerConfig, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            config: Arc::new(config),
            dispatcher,
            gate: Arc::new(OpenAccess),
            tls: None,
            middleware: MiddlewareChain::new(),
            web: None,
            metrics: None,
        }
    }

    /// Require callers to pass `gate` before their POSTs are dispatched
    pub fn with_access_gate(mut self, gate: Arc<dyn AccessGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_tls(mut self, tls: TlsServerConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_middleware(mut self, middleware: MiddlewareChain) -> Self {
        self.middleware = middleware;
        self
    }

    /// Serve the web profile
    pub fn with_web_access(mut self, web: WebAccess) -> Self {
        self.web = Some(web);
        self
    }

    /// Record request metrics, exposed on `metrics_path` when configured
    pub fn with_metrics(mut self, collector: MetricsCollector) -> Self {
        self.middleware = self.middleware.add(MetricsMiddleware::new(collector.clone()));
        self.metrics = Some(collector);
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn web_access(&self) -> Option<&WebAccess> {
        self.web.as_ref()
    }

    /// Bind the configured address
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        info!(
            "Dispatch server listening on {}{}",
            listener.local_addr()?,
            if self.tls.is_some() { " (TLS)" } else { "" }
        );
        Ok(listener)
    }

    /// Accept connections forever, one task per connection
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let server = Arc::new(self);
        let acceptor = server.tls.as_ref().map(TlsServerConfig::acceptor);

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Error accepting connection: {}", e);
                    continue;
                }
            };
            debug!("Accepted connection from {}", peer);

            let server = server.clone();
            let acceptor = acceptor.clone();
            tokio::task::spawn(async move {
                match acceptor {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(tls_stream) => server.serve_connection(tls_stream, peer).await,
                        Err(e) => {
                            let error = CoreError::SecureTransport(e.to_string());
                            warn!("TLS handshake with {} failed: {}", peer, error);
                        }
                    },
                    None => server.serve_connection(stream, peer).await,
                }
            });
        }
    }

    async fn serve_connection<S>(self: Arc<Self>, stream: S, peer: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let io = TokioIo::new(stream);
        let service = service_fn(move |req| {
            let server = self.clone();
            async move { Ok::<_, Infallible>(server.handle(req, peer).await) }
        });

        if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
            debug!("Error serving connection from {}: {}", peer, e);
        }
    }

    /// Handle one request; never fails, errors become HTTP responses
    pub async fn handle<B>(&self, req: Request<B>, peer: SocketAddr) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Display,
    {
        let (parts, body) = req.into_parts();
        let context = MiddlewareContext::from_parts(&parts, Some(peer));
        if let Err(e) = self.middleware.on_request(&context).await {
            debug!("Middleware on_request failed: {}", e);
        }

        let mut response = match self.route(&parts, body, peer, &context).await {
            Ok(response) => response,
            Err(error) => {
                if let Err(e) = self.middleware.on_error(&context, &error.to_string()).await {
                    debug!("Middleware on_error failed: {}", e);
                }
                self.error_response(&error)
            }
        };

        if self.web.is_some() {
            apply_cors(
                &mut response,
                &parts.method,
                parts.headers.get(ORIGIN),
                parts.headers.get(ACCESS_CONTROL_REQUEST_METHOD),
            );
        }

        if let Err(e) = self.middleware.on_response(&context, response.status().as_u16()).await {
            debug!("Middleware on_response failed: {}", e);
        }
        response
    }

    async fn route<B>(
        &self,
        parts: &Parts,
        body: B,
        peer: SocketAddr,
        context: &MiddlewareContext,
    ) -> Result<Response<Full<Bytes>>>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Display,
    {
        let path = parts.uri.path();
        let is_get = parts.method == Method::GET || parts.method == Method::HEAD;

        if is_get && path == ICON_PATH {
            return Ok(plain_response(
                StatusCode::OK,
                Some(ICON_CONTENT_TYPE),
                Bytes::from_static(constants::icon()),
            ));
        }

        if let Some(web) = &self.web {
            if parts.method != Method::POST || policy_document(path).is_some() {
                return web.handle(&parts.method, &parts.uri).await;
            }
        } else if is_get && self.config.metrics_path.as_deref() == Some(path) {
            return self.metrics_response();
        }

        if parts.method == Method::POST {
            return self.handle_rpc(parts, body, peer, context).await;
        }

        Err(CoreError::NotFound(path.to_string()))
    }

    async fn handle_rpc<B>(
        &self,
        parts: &Parts,
        body: B,
        peer: SocketAddr,
        context: &MiddlewareContext,
    ) -> Result<Response<Full<Bytes>>>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Display,
    {
        self.gate.authorize(&parts.headers)?;

        let path = parts.uri.path();
        if !self.config.rpc_paths.iter().any(|p| p == path) {
            return Err(CoreError::NotFound(path.to_string()));
        }

        let content_length = match parts.headers.get(CONTENT_LENGTH) {
            Some(value) => Some(
                value
                    .to_str()
                    .ok()
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .ok_or_else(|| CoreError::Protocol("invalid Content-Length".to_string()))?,
            ),
            None => None,
        };
        let data = read_body(
            body,
            content_length,
            self.config.max_chunk_size,
            self.config.max_body_size,
        )
        .await?;

        let call = decode_call(&data)?;
        context.set_metadata(RPC_METHOD_KEY, call.method.as_str());
        debug!("Dispatching {} from {}", call.method, peer);

        let method = call.method;
        let mut params = call.params;
        let origin = parts
            .headers
            .get(ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let user = basic_user(&parts.headers);

        if self.web.is_some() && method == WEBHUB_REGISTER {
            params.push(Value::Array(vec![
                Value::String(peer.ip().to_string()),
                Value::Int(i64::from(peer.port())),
            ]));
            params.push(Value::String(
                origin.clone().unwrap_or_else(|| "unknown".to_string()),
            ));
        } else if DELIVERY_METHODS.contains(&method.as_str()) {
            inject_provenance(
                &method,
                &mut params,
                &peer.ip().to_string(),
                user.as_deref().unwrap_or("unknown"),
            )?;
        }

        let caller = CallerContext {
            peer,
            user,
            origin,
            path: path.to_string(),
        };

        let body = match self.dispatcher.dispatch(&method, params, &caller).await {
            Ok(value) => encode_response(&value),
            Err(CoreError::Fault { code, message }) => {
                debug!("{} answered with fault {}: {}", method, code, message);
                encode_fault(&Fault { code, message })
            }
            Err(e) => return Err(e),
        };

        let accept_encoding = parts
            .headers
            .get(ACCEPT_ENCODING)
            .and_then(|v| v.to_str().ok());
        Ok(self.xml_response(body, accept_encoding))
    }

    fn xml_response(&self, body: String, accept_encoding: Option<&str>) -> Response<Full<Bytes>> {
        if should_compress(body.len(), self.config.encode_threshold, accept_encoding) {
            match gzip_encode(body.as_bytes()) {
                Ok(encoded) => {
                    let mut response = plain_response(StatusCode::OK, Some("text/xml"), Bytes::from(encoded));
                    response
                        .headers_mut()
                        .insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
                    return response;
                }
                Err(e) => warn!("Falling back to an uncompressed response: {}", e),
            }
        }
        plain_response(StatusCode::OK, Some("text/xml"), Bytes::from(body))
    }

    fn metrics_response(&self) -> Result<Response<Full<Bytes>>> {
        let collector = self
            .metrics
            .as_ref()
            .ok_or_else(|| CoreError::NotFound("metrics not enabled".to_string()))?;
        let text = collector
            .gather()
            .map_err(|e| CoreError::Internal(format!("failed to gather metrics: {}", e)))?;
        Ok(plain_response(
            StatusCode::OK,
            Some("text/plain; version=0.0.4"),
            Bytes::from(text),
        ))
    }

    fn error_response(&self, error: &CoreError) -> Response<Full<Bytes>> {
        match error {
            CoreError::NotFound(what) => {
                debug!("Not found: {}", what);
                plain_response(
                    StatusCode::NOT_FOUND,
                    Some("text/plain"),
                    Bytes::from_static(b"No such page"),
                )
            }
            CoreError::Unauthorized => {
                let mut response = plain_response(StatusCode::UNAUTHORIZED, None, Bytes::new());
                if let Ok(challenge) = HeaderValue::from_str(&format!("Basic realm=\"{}\"", REALM)) {
                    response.headers_mut().insert(WWW_AUTHENTICATE, challenge);
                }
                response
            }
            other => {
                warn!("Request failed: {}", other);
                let mut response = plain_response(StatusCode::INTERNAL_SERVER_ERROR, None, Bytes::new());
                if self.config.send_traceback_header {
                    let headers = response.headers_mut();
                    if let Ok(value) = HeaderValue::from_str(&other.to_string().escape_default().to_string()) {
                        headers.insert(X_EXCEPTION, value);
                    }
                    if let Ok(value) = HeaderValue::from_str(&error_chain(other).escape_default().to_string()) {
                        headers.insert(X_TRACEBACK, value);
                    }
                }
                response
            }
        }
    }
}

/// Build a response with an optional content type
pub(crate) fn plain_response(
    status: StatusCode,
    content_type: Option<&'static str>,
    body: Bytes,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    if let Some(content_type) = content_type {
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
    response
}

/// Buffer a request body in `max_chunk_size` increments
async fn read_body<B>(
    body: B,
    content_length: Option<usize>,
    max_chunk_size: usize,
    max_body_size: usize,
) -> Result<Vec<u8>>
where
    B: Body<Data = Bytes>,
    B::Error: Display,
{
    let limit = content_length.unwrap_or(max_body_size);
    if limit > max_body_size {
        return Err(CoreError::Protocol(format!(
            "request body of {} bytes exceeds the {} byte limit",
            limit, max_body_size
        )));
    }

    let increment = max_chunk_size.max(1);
    let mut data: Vec<u8> = Vec::with_capacity(content_length.unwrap_or(0).min(increment));
    let mut body = std::pin::pin!(body);

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|e| CoreError::Protocol(format!("reading request body: {}", e)))?;
        let Ok(chunk) = frame.into_data() else {
            continue;
        };

        if data.len() + chunk.len() > limit {
            return Err(CoreError::Protocol(format!(
                "request body exceeds {} bytes",
                limit
            )));
        }
        // Without a declared length the buffer grows with what arrives
        if content_length.is_some() && data.capacity() - data.len() < chunk.len() {
            let remaining = limit - data.len();
            data.reserve(chunk.len().max(increment.min(remaining)));
        }
        data.extend_from_slice(&chunk);
    }

    if let Some(expected) = content_length {
        if data.len() < expected {
            return Err(CoreError::Protocol(format!(
                "short request body: {} of {} bytes",
                data.len(),
                expected
            )));
        }
    }

    Ok(data)
}

/// Stamp a delivery payload with the caller's host and user
fn inject_provenance(method: &str, params: &mut [Value], host: &str, user: &str) -> Result<()> {
    let index = if method == HUB_CALL_AND_WAIT {
        2
    } else {
        params.len().saturating_sub(1)
    };

    let payload = params
        .get_mut(index)
        .and_then(Value::as_struct_mut)
        .ok_or_else(|| {
            CoreError::Protocol(format!(
                "{} expects a message struct at position {}",
                method,
                index + 1
            ))
        })?;

    payload.insert("host".to_string(), Value::from(host));
    payload.insert("user".to_string(), Value::from(user));
    Ok(())
}

fn error_chain(error: &CoreError) -> String {
    use std::error::Error as _;

    let mut lines = vec![format!("{:?}", error)];
    let mut source = error.source();
    while let Some(cause) = source {
        lines.push(format!("caused by: {}", cause));
        source = cause.source();
    }
    lines.join("\n")
}
