//! SAMP hub proxy and request dispatch server
pub mod auth;
pub mod compression;
pub mod hub_proxy;
pub mod metrics;
pub mod middleware;
pub mod mtls;
pub mod pool;
pub mod replier;
pub mod server;
pub mod tls;
pub mod transport;
pub mod translator;
pub mod web;

pub use auth::{AccessGate, AccessRestriction, BasicAuthGate, CredentialStore, OpenAccess, RestrictionScope};
pub use hub_proxy::{ConnectOptions, Credentials, HubProxy};
pub use metrics::{MetricsCollector, MetricsMiddleware};
pub use middleware::{LoggingMiddleware, Middleware, MiddlewareChain, MiddlewareContext};
pub use mtls::{ClientAuthMode, TlsClientConfig};
pub use pool::{ConnectionPool, PooledConnection};
pub use replier::{with_auto_reply, AutoReply, HandlerKind, MessageHandler, ReceivedMessage, ReplySender};
pub use server::{CallerContext, Dispatcher, DispatchServer, ServerConfig};
pub use tls::TlsServerConfig;
pub use transport::{Endpoint, HttpTransport, RpcTransport};
pub use translator::{ResourceFetcher, UrlFetcher};
pub use web::WebAccess;
