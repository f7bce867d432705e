//! Web profile access: cross-domain policies, CORS and the translator
//!
//! Browser clients cannot reach arbitrary URLs, so a registered web client
//! may ask the server to fetch a reference on its behalf through
//! `/translator/<client-id>?ref=<url>`.

use crate::server::plain_response;
use crate::translator::ResourceFetcher;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
    ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_LENGTH,
};
use hyper::{Method, Response, StatusCode, Uri};
use samp_core::{ClientRegistry, CoreError, Result};
use std::sync::Arc;
use tracing::{debug, warn};

pub const CROSS_DOMAIN_PATH: &str = "/crossdomain.xml";
pub const CLIENT_ACCESS_POLICY_PATH: &str = "/clientaccesspolicy.xml";
pub const TRANSLATOR_PREFIX: &str = "/translator/";

pub const CROSS_DOMAIN_XML: &str = r#"<?xml version='1.0'?>
<!DOCTYPE cross-domain-policy SYSTEM "http://www.adobe.com/xml/dtds/cross-domain-policy.dtd">
<cross-domain-policy>
  <site-control permitted-cross-domain-policies="all"/>
  <allow-access-from domain="*"/>
  <allow-http-request-headers-from domain="*" headers="*"/>
</cross-domain-policy>"#;

pub const CLIENT_ACCESS_POLICY_XML: &str = r#"<?xml version='1.0'?>
<access-policy>
  <cross-domain-access>
    <policy>
      <allow-from>
        <domain uri="*"/>
      </allow-from>
      <grant-to>
        <resource path="/" include-subpaths="true"/>
      </grant-to>
    </policy>
  </cross-domain-access>
</access-policy>"#;

/// Policy document served at `path`, as `(content type, body)`
pub fn policy_document(path: &str) -> Option<(&'static str, &'static str)> {
    match path {
        CROSS_DOMAIN_PATH => Some(("text/x-cross-domain-policy", CROSS_DOMAIN_XML)),
        CLIENT_ACCESS_POLICY_PATH => Some(("text/xml", CLIENT_ACCESS_POLICY_XML)),
        _ => None,
    }
}

/// Web profile state shared by all connection tasks
#[derive(Clone)]
pub struct WebAccess {
    registry: ClientRegistry,
    fetcher: Arc<dyn ResourceFetcher>,
}

impl WebAccess {
    pub fn new(fetcher: Arc<dyn ResourceFetcher>) -> Self {
        Self::with_registry(ClientRegistry::new(), fetcher)
    }

    pub fn with_registry(registry: ClientRegistry, fetcher: Arc<dyn ResourceFetcher>) -> Self {
        Self { registry, fetcher }
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Admit a web client to the translator
    pub async fn add_client(&self, client_id: &str, origin: &str) {
        self.registry.add_client(client_id, origin).await;
    }

    /// Revoke a web client; unknown ids are ignored
    pub async fn remove_client(&self, client_id: &str) {
        self.registry.remove_client(client_id).await;
    }

    /// Whether GET/HEAD may be served for `path`
    pub async fn is_path_valid(&self, path: &str) -> bool {
        if policy_document(path).is_some() {
            return true;
        }
        match path.strip_prefix(TRANSLATOR_PREFIX) {
            Some(client_id) => self.registry.contains(client_id).await,
            None => false,
        }
    }

    /// Serve a non-RPC web profile request
    pub async fn handle(&self, method: &Method, uri: &Uri) -> Result<Response<Full<Bytes>>> {
        let path = uri.path();

        if method == Method::OPTIONS {
            return Ok(plain_response(StatusCode::OK, None, Bytes::new()));
        }

        if method == Method::POST {
            return match policy_document(path) {
                Some((content_type, body)) => Ok(plain_response(
                    StatusCode::OK,
                    Some(content_type),
                    Bytes::from_static(body.as_bytes()),
                )),
                None => Err(CoreError::NotFound(path.to_string())),
            };
        }

        if method != Method::GET && method != Method::HEAD {
            return Err(CoreError::NotFound(path.to_string()));
        }

        if !self.is_path_valid(path).await {
            return Err(CoreError::NotFound(path.to_string()));
        }

        if let Some((content_type, body)) = policy_document(path) {
            return Ok(plain_response(
                StatusCode::OK,
                Some(content_type),
                Bytes::from_static(body.as_bytes()),
            ));
        }

        if method == Method::HEAD {
            return Ok(plain_response(StatusCode::OK, None, Bytes::new()));
        }

        self.translate(path, uri.query()).await
    }

    async fn translate(&self, path: &str, query: Option<&str>) -> Result<Response<Full<Bytes>>> {
        let reference = query
            .and_then(reference_from_query)
            .ok_or_else(|| CoreError::NotFound(format!("{} without ref", path)))?;

        debug!("Translator request {} for {}", path, reference);
        match self.fetcher.fetch(&reference).await {
            Ok(body) => Ok(plain_response(StatusCode::OK, None, Bytes::from(body))),
            Err(e) => {
                warn!("Translator fetch of {} failed: {}", reference, e);
                Err(CoreError::NotFound(reference))
            }
        }
    }
}

/// First `ref` parameter of a query string, form-decoded
fn reference_from_query(query: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "ref")
        .and_then(|(_, value)| {
            urlencoding::decode(&value.replace('+', " "))
                .ok()
                .map(|decoded| decoded.into_owned())
        })
        .filter(|reference| !reference.is_empty())
}

/// Add CORS headers for a request carrying `Origin`
pub fn apply_cors(
    response: &mut Response<Full<Bytes>>,
    method: &Method,
    origin: Option<&HeaderValue>,
    requested_method: Option<&HeaderValue>,
) {
    let Some(origin) = origin else {
        return;
    };

    let headers = response.headers_mut();
    if let (Some(requested), true) = (requested_method, method == Method::OPTIONS) {
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
        headers.insert(ACCESS_CONTROL_ALLOW_METHODS, requested.clone());
    }
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("Content-Type"));
    headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
}
