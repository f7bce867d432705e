//! Hub descriptors and the discovery collaborator interfaces

use crate::constants::{KEY_PROFILE_VERSION, KEY_SECRET, KEY_XMLRPC_URL};
use crate::{CoreError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Connection descriptor a hub publishes in its lock-file
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HubParams(BTreeMap<String, String>);

impl HubParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse lock-file contents: `key=value` lines, `#` starts a comment
    pub fn parse_lockfile(contents: &str) -> Self {
        let tokens = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
            .collect();
        Self(tokens)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The hub's XML-RPC endpoint, with stray backslashes removed
    pub fn xmlrpc_url(&self) -> Result<String> {
        self.get(KEY_XMLRPC_URL)
            .map(|url| url.replace('\\', ""))
            .ok_or_else(|| {
                CoreError::InvalidConfiguration(format!("hub descriptor has no {}", KEY_XMLRPC_URL))
            })
    }

    pub fn secret(&self) -> Option<&str> {
        self.get(KEY_SECRET)
    }

    pub fn profile_version(&self) -> Option<&str> {
        self.get(KEY_PROFILE_VERSION)
    }
}

/// Resolves the currently running hub
#[async_trait]
pub trait HubLocator: Send + Sync {
    async fn resolve_running_hub(&self) -> Result<HubParams>;
}

/// An in-process hub a client may connect to directly
pub trait RunningHub: Send + Sync {
    fn is_running(&self) -> bool;

    fn params(&self) -> HubParams;
}
