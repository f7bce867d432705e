//! Dispatcher forwarding every call to the upstream hub

use async_trait::async_trait;
use samp_core::constants::{
    HUB_PREFIX, KEY_PRIVATE_KEY, KEY_SELF_ID, WEBHUB_PREFIX, WEBHUB_REGISTER, WEBHUB_UNREGISTER,
};
use samp_core::{CoreError, Result, Value};
use samp_proxy::{CallerContext, Dispatcher, HubProxy, WebAccess};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Web profile methods that map one-to-one onto hub methods
const FORWARDED_WEB_METHODS: [&str; 13] = [
    "ping",
    "declareMetadata",
    "getMetadata",
    "declareSubscriptions",
    "getSubscriptions",
    "getRegisteredClients",
    "getSubscribedClients",
    "notify",
    "notifyAll",
    "call",
    "callAll",
    "callAndWait",
    "reply",
];

/// HubRelay answers inbound calls through a connected hub proxy
pub struct HubRelay {
    proxy: HubProxy,
    web: Option<WebAccess>,
    // private key to client id, for web clients registered through the relay
    web_clients: RwLock<HashMap<String, String>>,
}

impl HubRelay {
    pub fn new(proxy: HubProxy) -> Self {
        Self {
            proxy,
            web: None,
            web_clients: RwLock::new(HashMap::new()),
        }
    }

    /// Admit web clients into the translator registry as they register
    pub fn with_web_access(mut self, web: WebAccess) -> Self {
        self.web = Some(web);
        self
    }

    pub fn proxy(&self) -> &HubProxy {
        &self.proxy
    }

    async fn register_web_client(&self, params: Vec<Value>) -> Result<Value> {
        let origin = params
            .last()
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let secret = self
            .proxy
            .hub_params()
            .and_then(|p| p.secret())
            .map(str::to_string)
            .ok_or_else(|| CoreError::fault(1, "Upstream hub published no secret"))?;

        let registration = self.proxy.register(&secret).await?;
        let private_key = registration.get(KEY_PRIVATE_KEY).and_then(Value::as_str);
        let client_id = registration.get(KEY_SELF_ID).and_then(Value::as_str);
        if let (Some(private_key), Some(client_id)) = (private_key, client_id) {
            if let Some(web) = &self.web {
                web.add_client(client_id, &origin).await;
            }
            self.web_clients
                .write()
                .await
                .insert(private_key.to_string(), client_id.to_string());
            info!("Web client {} registered from {}", client_id, origin);
        }

        Ok(Value::Struct(registration))
    }

    async fn unregister_web_client(&self, params: Vec<Value>) -> Result<Value> {
        let private_key = params
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::fault(1, "samp.webhub.unregister expects a private key"))?
            .to_string();

        self.proxy.unregister(&private_key).await?;

        let client_id = self.web_clients.write().await.remove(&private_key);
        if let (Some(client_id), Some(web)) = (client_id, &self.web) {
            web.remove_client(&client_id).await;
            info!("Web client {} unregistered", client_id);
        }
        Ok(Value::from(""))
    }
}

#[async_trait]
impl Dispatcher for HubRelay {
    async fn dispatch(&self, method: &str, params: Vec<Value>, caller: &CallerContext) -> Result<Value> {
        debug!("Relaying {} for {}", method, caller.peer);

        match method {
            WEBHUB_REGISTER => self.register_web_client(params).await,
            WEBHUB_UNREGISTER => self.unregister_web_client(params).await,
            _ => match method.strip_prefix(WEBHUB_PREFIX) {
                Some(name) if FORWARDED_WEB_METHODS.contains(&name) => {
                    let hub_method = format!("{}{}", HUB_PREFIX, name);
                    self.proxy.invoke(&hub_method, params).await
                }
                Some(_) => Err(CoreError::fault(
                    1,
                    format!("{} is not supported by this relay", method),
                )),
                None => self.proxy.invoke(method, params).await,
            },
        }
    }
}
