//! Client-side proxy to a running SAMP hub

use crate::mtls::TlsClientConfig;
use crate::pool::ConnectionPool;
use crate::transport::{Endpoint, HttpTransport, RpcTransport};
use samp_core::constants::{
    HUB_CALL, HUB_CALL_ALL, HUB_CALL_AND_WAIT, HUB_DECLARE_METADATA, HUB_DECLARE_SUBSCRIPTIONS,
    HUB_GET_METADATA, HUB_GET_REGISTERED_CLIENTS, HUB_GET_SUBSCRIBED_CLIENTS, HUB_GET_SUBSCRIPTIONS,
    HUB_NOTIFY, HUB_NOTIFY_ALL, HUB_PING, HUB_REGISTER, HUB_REPLY, HUB_SET_XMLRPC_CALLBACK,
    HUB_UNREGISTER,
};
use samp_core::{CoreError, HubLocator, HubParams, Response, Result, RunningHub, Struct, Value};
use samp_discovery::LockfileLocator;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Basic-Auth credentials sent with every hub call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

/// How `HubProxy::connect` finds and reaches the hub
#[derive(Clone)]
pub struct ConnectOptions {
    /// An in-process hub to connect to
    pub hub: Option<Arc<dyn RunningHub>>,
    /// An explicit hub descriptor
    pub hub_params: Option<HubParams>,
    /// Used when neither `hub` nor `hub_params` is given; lock-file
    /// discovery from `SAMP_HUB` and the home directory when unset
    pub locator: Option<Arc<dyn HubLocator>>,
    /// TLS options for `https` hubs; unverified when unset
    pub tls: Option<TlsClientConfig>,
    /// Overrides credentials embedded in the hub URL
    pub credentials: Option<Credentials>,
    pub pool_size: usize,
    pub acquire_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            hub: None,
            hub_params: None,
            locator: None,
            tls: None,
            credentials: None,
            pool_size: 20,
            acquire_timeout: None,
            connect_timeout: None,
        }
    }
}

impl ConnectOptions {
    pub fn with_hub_params(params: HubParams) -> Self {
        Self {
            hub_params: Some(params),
            ..Self::default()
        }
    }

    pub fn with_locator(locator: Arc<dyn HubLocator>) -> Self {
        Self {
            locator: Some(locator),
            ..Self::default()
        }
    }
}

/// Proxy forwarding SAMP hub operations over a pool of connections
///
/// The proxy is `Disconnected` until `connect` succeeds. All hub operations
/// take `&self` and may overlap up to the pool size.
#[derive(Default)]
pub struct HubProxy {
    pool: Option<Arc<ConnectionPool<Box<dyn RpcTransport>>>>,
    params: Option<HubParams>,
}

impl HubProxy {
    pub fn new() -> Self {
        Self::default()
    }

    /// A connected proxy over an existing pool
    pub fn with_pool(pool: Arc<ConnectionPool<Box<dyn RpcTransport>>>, params: HubParams) -> Self {
        Self {
            pool: Some(pool),
            params: Some(params),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.pool.is_some()
    }

    pub fn hub_params(&self) -> Option<&HubParams> {
        self.params.as_ref()
    }

    /// Number of pooled connections; zero while disconnected
    pub fn pool_size(&self) -> usize {
        self.pool.as_ref().map(|pool| pool.capacity()).unwrap_or(0)
    }

    /// Connect to a hub, replacing any existing connection
    pub async fn connect(&mut self, options: ConnectOptions) -> Result<()> {
        self.disconnect();

        let params = match (&options.hub, &options.hub_params) {
            (Some(_), Some(_)) => {
                return Err(CoreError::InvalidConfiguration(
                    "Only one of hub or hub_params may be given".to_string(),
                ))
            }
            (Some(hub), None) => {
                if !hub.is_running() {
                    return Err(CoreError::HubNotFound(
                        "The supplied hub is not running".to_string(),
                    ));
                }
                hub.params()
            }
            (None, Some(params)) => params.clone(),
            (None, None) => match &options.locator {
                Some(locator) => locator.resolve_running_hub().await?,
                None => LockfileLocator::from_env().resolve_running_hub().await?,
            },
        };

        let url = params.xmlrpc_url()?;
        let endpoint = Endpoint::parse(&url)?;
        let connector = if endpoint.secure {
            let tls = options.tls.clone().unwrap_or_default();
            Some(
                tls.build_connector()
                    .map_err(|e| CoreError::SecureTransport(e.to_string()))?,
            )
        } else {
            None
        };

        let pool = ConnectionPool::new(options.pool_size, || {
            let mut transport =
                HttpTransport::new(endpoint.clone()).with_connect_timeout(options.connect_timeout);
            if let Some(connector) = &connector {
                transport = transport.with_tls(connector.clone());
            }
            if let Some(credentials) = &options.credentials {
                transport = transport.with_basic_auth(&credentials.user, &credentials.password);
            }
            Box::new(transport) as Box<dyn RpcTransport>
        })?
        .with_acquire_timeout(options.acquire_timeout);
        let pool = Arc::new(pool);

        debug!("Pinging hub at {}", endpoint.authority());
        match pool.invoke(HUB_PING, Vec::new()).await {
            Ok(_) => {}
            Err(e @ (CoreError::Unauthorized
            | CoreError::SecureTransport(_)
            | CoreError::ConnectionRefused(_))) => return Err(e),
            Err(other) => return Err(CoreError::ConnectionRefused(other.to_string())),
        }

        info!(
            "Connected to SAMP hub at {} with {} pooled connections",
            endpoint.authority(),
            options.pool_size
        );
        self.pool = Some(pool);
        self.params = Some(params);
        Ok(())
    }

    /// Drop the connection pool and hub descriptor; safe to repeat
    pub fn disconnect(&mut self) {
        if self.pool.take().is_some() {
            info!("Disconnected from SAMP hub");
        }
        self.params = None;
    }

    /// Invoke any hub method by its full name
    pub async fn invoke(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let pool = self.pool.as_ref().ok_or(CoreError::NotConnected)?;
        pool.invoke(method, params).await
    }

    pub async fn ping(&self) -> Result<()> {
        self.invoke(HUB_PING, Vec::new()).await.map(|_| ())
    }

    pub async fn set_xmlrpc_callback(&self, private_key: &str, xmlrpc_addr: &str) -> Result<()> {
        self.invoke(
            HUB_SET_XMLRPC_CALLBACK,
            vec![private_key.into(), xmlrpc_addr.into()],
        )
        .await
        .map(|_| ())
    }

    /// Register with the hub; the reply carries the private key and ids
    pub async fn register(&self, secret: &str) -> Result<Struct> {
        let value = self.invoke(HUB_REGISTER, vec![secret.into()]).await?;
        expect_struct(HUB_REGISTER, value)
    }

    pub async fn unregister(&self, private_key: &str) -> Result<()> {
        self.invoke(HUB_UNREGISTER, vec![private_key.into()])
            .await
            .map(|_| ())
    }

    pub async fn declare_metadata(&self, private_key: &str, metadata: Struct) -> Result<()> {
        self.invoke(
            HUB_DECLARE_METADATA,
            vec![private_key.into(), Value::Struct(metadata)],
        )
        .await
        .map(|_| ())
    }

    pub async fn get_metadata(&self, private_key: &str, client_id: &str) -> Result<Struct> {
        let value = self
            .invoke(HUB_GET_METADATA, vec![private_key.into(), client_id.into()])
            .await?;
        expect_struct(HUB_GET_METADATA, value)
    }

    pub async fn declare_subscriptions(&self, private_key: &str, subscriptions: Struct) -> Result<()> {
        self.invoke(
            HUB_DECLARE_SUBSCRIPTIONS,
            vec![private_key.into(), Value::Struct(subscriptions)],
        )
        .await
        .map(|_| ())
    }

    pub async fn get_subscriptions(&self, private_key: &str, client_id: &str) -> Result<Struct> {
        let value = self
            .invoke(HUB_GET_SUBSCRIPTIONS, vec![private_key.into(), client_id.into()])
            .await?;
        expect_struct(HUB_GET_SUBSCRIPTIONS, value)
    }

    pub async fn get_registered_clients(&self, private_key: &str) -> Result<Vec<String>> {
        let value = self
            .invoke(HUB_GET_REGISTERED_CLIENTS, vec![private_key.into()])
            .await?;
        expect_string_list(HUB_GET_REGISTERED_CLIENTS, value)
    }

    pub async fn get_subscribed_clients(&self, private_key: &str, mtype: &str) -> Result<Struct> {
        let value = self
            .invoke(HUB_GET_SUBSCRIBED_CLIENTS, vec![private_key.into(), mtype.into()])
            .await?;
        expect_struct(HUB_GET_SUBSCRIBED_CLIENTS, value)
    }

    pub async fn notify(&self, private_key: &str, recipient_id: &str, message: impl Into<Value>) -> Result<()> {
        self.invoke(
            HUB_NOTIFY,
            vec![private_key.into(), recipient_id.into(), message.into()],
        )
        .await
        .map(|_| ())
    }

    /// Notify every subscribed client; returns the recipients
    pub async fn notify_all(&self, private_key: &str, message: impl Into<Value>) -> Result<Vec<String>> {
        let value = self
            .invoke(HUB_NOTIFY_ALL, vec![private_key.into(), message.into()])
            .await?;
        expect_string_list(HUB_NOTIFY_ALL, value)
    }

    /// Send a call; returns the hub's message id
    pub async fn call(
        &self,
        private_key: &str,
        recipient_id: &str,
        msg_tag: &str,
        message: impl Into<Value>,
    ) -> Result<String> {
        let value = self
            .invoke(
                HUB_CALL,
                vec![
                    private_key.into(),
                    recipient_id.into(),
                    msg_tag.into(),
                    message.into(),
                ],
            )
            .await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| unexpected(HUB_CALL, "string", &value))
    }

    /// Call every subscribed client; returns recipient id to message id
    pub async fn call_all(&self, private_key: &str, msg_tag: &str, message: impl Into<Value>) -> Result<Struct> {
        let value = self
            .invoke(
                HUB_CALL_ALL,
                vec![private_key.into(), msg_tag.into(), message.into()],
            )
            .await?;
        expect_struct(HUB_CALL_ALL, value)
    }

    /// Call and block for the reply, for at most `timeout`
    ///
    /// A zero timeout waits for as long as the hub does.
    pub async fn call_and_wait(
        &self,
        private_key: &str,
        recipient_id: &str,
        message: impl Into<Value>,
        timeout: Duration,
    ) -> Result<Struct> {
        let params = vec![
            private_key.into(),
            recipient_id.into(),
            message.into(),
            Value::String(timeout_seconds(timeout).to_string()),
        ];

        let value = if timeout.is_zero() {
            self.invoke(HUB_CALL_AND_WAIT, params).await?
        } else {
            tokio::time::timeout(timeout, self.invoke(HUB_CALL_AND_WAIT, params))
                .await
                .map_err(|_| CoreError::Timeout("call timed out".to_string()))??
        };
        expect_struct(HUB_CALL_AND_WAIT, value)
    }

    pub async fn reply(&self, private_key: &str, msg_id: &str, response: Response) -> Result<()> {
        self.invoke(
            HUB_REPLY,
            vec![private_key.into(), msg_id.into(), response.into()],
        )
        .await
        .map(|_| ())
    }
}

/// Whole seconds, rounded up, as sent to the hub
fn timeout_seconds(timeout: Duration) -> u64 {
    timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0)
}

fn unexpected(method: &str, expected: &str, value: &Value) -> CoreError {
    CoreError::Protocol(format!(
        "{} returned {}, expected {}",
        method,
        value.kind(),
        expected
    ))
}

fn expect_struct(method: &str, value: Value) -> Result<Struct> {
    match value {
        Value::Struct(members) => Ok(members),
        other => Err(unexpected(method, "struct", &other)),
    }
}

fn expect_string_list(method: &str, value: Value) -> Result<Vec<String>> {
    let items = value
        .as_array()
        .ok_or_else(|| unexpected(method, "array", &value))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| unexpected(method, "array of strings", &value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AccessRestriction, BasicAuthGate, CredentialStore};
    use crate::server::{CallerContext, DispatchServer, Dispatcher, ServerConfig};
    use crate::tls::TlsServerConfig;
    use async_trait::async_trait;
    use samp_core::constants::{KEY_PRIVATE_KEY, KEY_SECRET, KEY_SELF_ID, KEY_XMLRPC_URL};
    use samp_core::Message;
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    type CallLog = Arc<Mutex<Vec<(String, Vec<Value>)>>>;

    struct ScriptedTransport {
        log: CallLog,
    }

    #[async_trait]
    impl RpcTransport for ScriptedTransport {
        async fn invoke(&mut self, method: &str, params: Vec<Value>) -> Result<Value> {
            self.log
                .lock()
                .expect("lock")
                .push((method.to_string(), params.clone()));
            match method {
                HUB_CALL_AND_WAIT => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(Value::Struct(Struct::new()))
                }
                HUB_GET_REGISTERED_CLIENTS => Ok(Value::from(vec![
                    "hub".to_string(),
                    "c2".to_string(),
                ])),
                HUB_CALL => Ok(Value::from("msg-1")),
                HUB_GET_METADATA => Ok(Value::from("not a struct")),
                _ => Ok(Value::from("")),
            }
        }
    }

    fn scripted_proxy(capacity: usize) -> (HubProxy, Arc<ConnectionPool<Box<dyn RpcTransport>>>, CallLog) {
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        let pool = Arc::new(
            ConnectionPool::new(capacity, || {
                Box::new(ScriptedTransport { log: log.clone() }) as Box<dyn RpcTransport>
            })
            .expect("pool"),
        );
        let proxy = HubProxy::with_pool(pool.clone(), HubParams::new());
        (proxy, pool, log)
    }

    struct StaticHub {
        running: bool,
    }

    impl RunningHub for StaticHub {
        fn is_running(&self) -> bool {
            self.running
        }

        fn params(&self) -> HubParams {
            HubParams::new().with(KEY_XMLRPC_URL, "http://127.0.0.1:1/")
        }
    }

    struct NoHubLocator;

    #[async_trait]
    impl HubLocator for NoHubLocator {
        async fn resolve_running_hub(&self) -> Result<HubParams> {
            Err(CoreError::HubNotFound("Unable to find a running SAMP Hub.".to_string()))
        }
    }

    /// Answers like a minimal hub
    struct FakeHub;

    #[async_trait]
    impl Dispatcher for FakeHub {
        async fn dispatch(&self, method: &str, params: Vec<Value>, caller: &CallerContext) -> Result<Value> {
            match method {
                HUB_PING => Ok(Value::from("")),
                HUB_REGISTER => {
                    let mut reply = Struct::new();
                    reply.insert(KEY_PRIVATE_KEY.to_string(), Value::from("pk-1"));
                    reply.insert(KEY_SELF_ID.to_string(), Value::from("c1"));
                    Ok(Value::Struct(reply))
                }
                HUB_NOTIFY => {
                    // Echo the provenance the server injected
                    let payload = params.get(2).cloned().unwrap_or(Value::Nil);
                    let user = payload.get("user").cloned().unwrap_or(Value::Nil);
                    if user == Value::from("unknown") && caller.peer.ip().is_loopback() {
                        Ok(Value::from(""))
                    } else {
                        Err(CoreError::fault(1, "unexpected user"))
                    }
                }
                _ => Err(CoreError::fault(1, format!("No such method {}", method))),
            }
        }
    }

    async fn start_hub(server: DispatchServer) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(server.serve(listener));
        format!("http://{}/", addr)
    }

    #[test]
    fn test_timeout_seconds_round_up() {
        assert_eq!(timeout_seconds(Duration::from_secs(10)), 10);
        assert_eq!(timeout_seconds(Duration::from_millis(1500)), 2);
        assert_eq!(timeout_seconds(Duration::from_millis(50)), 1);
        assert_eq!(timeout_seconds(Duration::ZERO), 0);
    }

    #[tokio::test]
    async fn test_disconnected_proxy() {
        let mut proxy = HubProxy::new();
        assert!(!proxy.is_connected());
        assert_eq!(proxy.pool_size(), 0);
        assert!(matches!(proxy.ping().await, Err(CoreError::NotConnected)));
        proxy.disconnect();
        proxy.disconnect();
        assert!(!proxy.is_connected());
    }

    #[tokio::test]
    async fn test_ambiguous_connect_rejected() {
        let mut proxy = HubProxy::new();
        let options = ConnectOptions {
            hub: Some(Arc::new(StaticHub { running: true })),
            hub_params: Some(HubParams::new().with(KEY_XMLRPC_URL, "http://127.0.0.1:1/")),
            ..ConnectOptions::default()
        };
        let result = proxy.connect(options).await;
        assert!(matches!(result, Err(CoreError::InvalidConfiguration(_))));
        assert!(!proxy.is_connected());
    }

    #[tokio::test]
    async fn test_stopped_hub_not_found() {
        let mut proxy = HubProxy::new();
        let options = ConnectOptions {
            hub: Some(Arc::new(StaticHub { running: false })),
            ..ConnectOptions::default()
        };
        assert!(matches!(
            proxy.connect(options).await,
            Err(CoreError::HubNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_no_hub_located() {
        let mut proxy = HubProxy::new();
        let empty_home = std::env::temp_dir().join(format!("samp-proxy-nohub-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&empty_home);
        std::fs::create_dir_all(&empty_home).expect("create home");
        let locator = LockfileLocator::new(Some(empty_home.clone()), None);
        assert!(matches!(
            proxy.connect(ConnectOptions::with_locator(Arc::new(locator))).await,
            Err(CoreError::HubNotFound(_))
        ));
        std::fs::remove_dir_all(&empty_home).expect("cleanup");

        assert!(matches!(
            proxy
                .connect(ConnectOptions::with_locator(Arc::new(NoHubLocator)))
                .await,
            Err(CoreError::HubNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_default_options_discover_hub_from_lockfile() {
        let server = DispatchServer::new(ServerConfig::default(), Arc::new(FakeHub));
        let url = start_hub(server).await;
        let lockfile = std::env::temp_dir().join(format!("samp-proxy-lock-{}", std::process::id()));
        std::fs::write(
            &lockfile,
            format!("samp.secret=from-lockfile\n{}={}\n", KEY_XMLRPC_URL, url),
        )
        .expect("write lockfile");

        std::env::set_var(
            samp_discovery::SAMP_HUB_ENV,
            format!("std-lockurl:file://{}", lockfile.display()),
        );
        let mut proxy = HubProxy::new();
        let result = proxy.connect(ConnectOptions::default()).await;
        std::env::remove_var(samp_discovery::SAMP_HUB_ENV);
        std::fs::remove_file(&lockfile).expect("cleanup");

        result.expect("connect through the lock file");
        assert!(proxy.is_connected());
        assert_eq!(
            proxy.hub_params().and_then(|p| p.secret()),
            Some("from-lockfile")
        );
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let mut proxy = HubProxy::new();
        let params = HubParams::new().with(KEY_XMLRPC_URL, format!("http://127.0.0.1:{}/", port));
        let result = proxy.connect(ConnectOptions::with_hub_params(params)).await;
        assert!(matches!(result, Err(CoreError::ConnectionRefused(_))));
        assert!(!proxy.is_connected());
    }

    #[tokio::test]
    async fn test_operations_forward_method_names() {
        let (proxy, _, log) = scripted_proxy(2);

        proxy.ping().await.expect("ping");
        proxy
            .notify("pk", "c2", Message::new("samp.app.ping"))
            .await
            .expect("notify");
        assert_eq!(
            proxy.get_registered_clients("pk").await.expect("clients"),
            vec!["hub".to_string(), "c2".to_string()]
        );
        assert_eq!(
            proxy
                .call("pk", "c2", "tag-1", Message::new("samp.app.ping"))
                .await
                .expect("call"),
            "msg-1"
        );
        assert!(matches!(
            proxy.get_metadata("pk", "c2").await,
            Err(CoreError::Protocol(_))
        ));
        proxy
            .invoke("x-samp.custom.method", vec![Value::from(1)])
            .await
            .expect("generic invoke");

        let log = log.lock().expect("lock");
        let methods: Vec<&str> = log.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(
            methods,
            vec![
                HUB_PING,
                HUB_NOTIFY,
                HUB_GET_REGISTERED_CLIENTS,
                HUB_CALL,
                HUB_GET_METADATA,
                "x-samp.custom.method"
            ]
        );
        assert_eq!(log[1].1[1], Value::from("c2"));
        assert_eq!(
            log[1].1[2].get("samp.mtype"),
            Some(&Value::from("samp.app.ping"))
        );
    }

    #[tokio::test]
    async fn test_call_and_wait_timeout_releases_handle() {
        let (proxy, pool, log) = scripted_proxy(1);

        let started = std::time::Instant::now();
        let result = proxy
            .call_and_wait("pk", "c2", Message::new("samp.app.ping"), Duration::from_millis(100))
            .await;
        assert!(started.elapsed() < Duration::from_secs(5));
        match result {
            Err(CoreError::Timeout(message)) => assert_eq!(message, "call timed out"),
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(pool.available(), 1);
        assert_eq!(log.lock().expect("lock")[0].1[3], Value::from("1"));

        // The released handle serves the next call
        proxy.ping().await.expect("ping after timeout");
    }

    #[tokio::test]
    async fn test_end_to_end_over_loopback() {
        let server = DispatchServer::new(ServerConfig::default(), Arc::new(FakeHub));
        let url = start_hub(server).await;

        let mut proxy = HubProxy::new();
        let params = HubParams::new()
            .with(KEY_XMLRPC_URL, url)
            .with(KEY_SECRET, "s3cret");
        let options = ConnectOptions {
            pool_size: 3,
            ..ConnectOptions::with_hub_params(params)
        };
        proxy.connect(options).await.expect("connect");
        assert!(proxy.is_connected());
        assert_eq!(proxy.pool_size(), 3);
        assert_eq!(
            proxy.hub_params().and_then(|p| p.secret()),
            Some("s3cret")
        );

        let registration = proxy.register("s3cret").await.expect("register");
        assert_eq!(
            registration.get(KEY_PRIVATE_KEY),
            Some(&Value::from("pk-1"))
        );

        let shared = Arc::new(proxy);
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..10 {
            let proxy = shared.clone();
            tasks.spawn(async move {
                proxy
                    .notify("pk-1", "c2", Message::new("samp.app.ping"))
                    .await
            });
        }
        while let Some(outcome) = tasks.join_next().await {
            outcome.expect("task").expect("notify");
        }

        match shared.invoke("samp.hub.unknown", vec![]).await {
            Err(CoreError::Fault { code, .. }) => assert_eq!(code, 1),
            other => panic!("expected fault, got {:?}", other),
        }

        let mut proxy = Arc::try_unwrap(shared).ok().expect("sole owner");
        proxy.disconnect();
        assert!(!proxy.is_connected());
        assert!(proxy.hub_params().is_none());
        proxy.disconnect();
    }

    #[tokio::test]
    async fn test_unauthorized_connect() {
        let store = CredentialStore::new().with_user("alice", "pw", &[]);
        let server = DispatchServer::new(ServerConfig::default(), Arc::new(FakeHub))
            .with_access_gate(Arc::new(BasicAuthGate::new(store, AccessRestriction::default())));
        let url = start_hub(server).await;

        let mut proxy = HubProxy::new();
        let params = HubParams::new().with(KEY_XMLRPC_URL, url.clone());
        let result = proxy
            .connect(ConnectOptions::with_hub_params(params.clone()))
            .await;
        assert!(matches!(result, Err(CoreError::Unauthorized)));

        let options = ConnectOptions {
            credentials: Some(Credentials::new("alice", "pw")),
            ..ConnectOptions::with_hub_params(params)
        };
        proxy.connect(options).await.expect("authorized connect");

        let embedded = HubParams::new().with(
            KEY_XMLRPC_URL,
            url.replace("http://", "http://alice:pw@"),
        );
        proxy
            .connect(ConnectOptions::with_hub_params(embedded))
            .await
            .expect("credentials from URL");
    }

    /// Self-signed certificate and key PEMs valid for the loopback address
    fn loopback_certificate() -> (String, String) {
        let certified = rcgen::generate_simple_self_signed(vec![
            "127.0.0.1".to_string(),
            "localhost".to_string(),
        ])
        .expect("certificate");
        (certified.cert.pem(), certified.key_pair.serialize_pem())
    }

    async fn start_tls_hub(cert_pem: &str, key_pem: &str) -> String {
        let tls = TlsServerConfig::from_pem(cert_pem.as_bytes(), key_pem.as_bytes(), None)
            .expect("server TLS");
        let server = DispatchServer::new(ServerConfig::default(), Arc::new(FakeHub)).with_tls(tls);
        start_hub(server).await.replacen("http://", "https://", 1)
    }

    #[tokio::test]
    async fn test_tls_round_trip() {
        let (cert_pem, key_pem) = loopback_certificate();
        let url = start_tls_hub(&cert_pem, &key_pem).await;
        let params = HubParams::new().with(KEY_XMLRPC_URL, url);

        let mut proxy = HubProxy::new();
        let verified = ConnectOptions {
            tls: Some(TlsClientConfig::new(
                None,
                None,
                Some(cert_pem.clone().into_bytes()),
                true,
            )),
            ..ConnectOptions::with_hub_params(params.clone())
        };
        proxy.connect(verified).await.expect("verified TLS connect");
        let registration = proxy.register("s3cret").await.expect("register over TLS");
        assert_eq!(registration.get(KEY_SELF_ID), Some(&Value::from("c1")));

        // Without a CA the client accepts the self-signed certificate
        proxy
            .connect(ConnectOptions::with_hub_params(params))
            .await
            .expect("unverified TLS connect");
        proxy.ping().await.expect("ping over TLS");
    }

    #[tokio::test]
    async fn test_tls_untrusted_certificate_is_secure_transport_error() {
        let (cert_pem, key_pem) = loopback_certificate();
        let (other_ca, _) = loopback_certificate();
        let url = start_tls_hub(&cert_pem, &key_pem).await;

        let mut proxy = HubProxy::new();
        let options = ConnectOptions {
            tls: Some(TlsClientConfig::new(None, None, Some(other_ca.into_bytes()), true)),
            ..ConnectOptions::with_hub_params(HubParams::new().with(KEY_XMLRPC_URL, url))
        };
        let result = proxy.connect(options).await;
        assert!(
            matches!(result, Err(CoreError::SecureTransport(_))),
            "got {:?}",
            result
        );
        assert!(!proxy.is_connected());
    }

    #[tokio::test]
    async fn test_plaintext_hub_behind_https_url() {
        let server = DispatchServer::new(ServerConfig::default(), Arc::new(FakeHub));
        let url = start_hub(server).await.replacen("http://", "https://", 1);

        let mut proxy = HubProxy::new();
        let result = proxy
            .connect(ConnectOptions::with_hub_params(
                HubParams::new().with(KEY_XMLRPC_URL, url),
            ))
            .await;
        assert!(
            matches!(result, Err(CoreError::SecureTransport(_))),
            "got {:?}",
            result
        );
        assert!(!proxy.is_connected());
    }
}
