//! Relay settings read from the environment

use anyhow::{bail, Context, Result};
use samp_proxy::{AccessRestriction, ClientAuthMode};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Which SAMP profile the relay speaks to its own clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Standard,
    Web,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub addr: SocketAddr,
    pub profile: Profile,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub tls_ca: Option<PathBuf>,
    pub tls_min_version: Option<String>,
    pub client_auth: ClientAuthMode,
    pub auth_file: Option<PathBuf>,
    pub restriction: AccessRestriction,
    pub pool_size: usize,
    pub diagnostics: bool,
    pub metrics_path: Option<String>,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let addr = match var("SAMP_RELAY_ADDR") {
            Some(addr) => addr
                .parse()
                .with_context(|| format!("Invalid SAMP_RELAY_ADDR {}", addr))?,
            None => SocketAddr::from(([127, 0, 0, 1], 21012)),
        };

        let profile = match var("SAMP_RELAY_PROFILE").as_deref() {
            None | Some("standard") => Profile::Standard,
            Some("web") => Profile::Web,
            Some(other) => bail!("Unknown SAMP_RELAY_PROFILE {}", other),
        };

        let tls_cert = var("SAMP_RELAY_TLS_CERT").map(PathBuf::from);
        let tls_key = var("SAMP_RELAY_TLS_KEY").map(PathBuf::from);
        if tls_cert.is_some() != tls_key.is_some() {
            bail!("SAMP_RELAY_TLS_CERT and SAMP_RELAY_TLS_KEY must be set together");
        }

        let scope = match (var("SAMP_RELAY_RESTRICT_USER"), var("SAMP_RELAY_RESTRICT_GROUP")) {
            (Some(_), Some(_)) => {
                bail!("SAMP_RELAY_RESTRICT_USER and SAMP_RELAY_RESTRICT_GROUP are exclusive")
            }
            (Some(user), None) => AccessRestriction::user(user),
            (None, Some(group)) => AccessRestriction::group(group),
            (None, None) => AccessRestriction::default(),
        };
        let restriction = match var("SAMP_RELAY_ADMIN") {
            Some(admin) => scope.with_admin(admin),
            None => scope,
        };

        let pool_size = match var("SAMP_RELAY_POOL_SIZE") {
            Some(size) => size
                .parse()
                .with_context(|| format!("Invalid SAMP_RELAY_POOL_SIZE {}", size))?,
            None => 20,
        };

        let metrics_path = var("SAMP_RELAY_METRICS_PATH");
        if profile == Profile::Web && metrics_path.is_some() {
            bail!("SAMP_RELAY_METRICS_PATH is only available with the standard profile");
        }

        Ok(Self {
            addr,
            profile,
            tls_cert,
            tls_key,
            tls_ca: var("SAMP_RELAY_TLS_CA").map(PathBuf::from),
            tls_min_version: var("SAMP_RELAY_TLS_MIN_VERSION"),
            client_auth: var("SAMP_RELAY_TLS_CLIENT_AUTH")
                .map(|mode| ClientAuthMode::from_string(&mode))
                .unwrap_or_default(),
            auth_file: var("SAMP_RELAY_AUTH_FILE").map(PathBuf::from),
            restriction,
            pool_size,
            diagnostics: matches!(
                var("SAMP_RELAY_DIAGNOSTICS").as_deref(),
                Some("1") | Some("true") | Some("yes")
            ),
            metrics_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use samp_proxy::{CredentialStore, RestrictionScope};
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<RelayConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RelayConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).expect("config");
        assert_eq!(config.addr, SocketAddr::from(([127, 0, 0, 1], 21012)));
        assert_eq!(config.profile, Profile::Standard);
        assert_eq!(config.pool_size, 20);
        assert_eq!(config.client_auth, ClientAuthMode::NoClientAuth);
        assert_eq!(config.restriction, AccessRestriction::default());
        assert!(!config.diagnostics);
        assert!(config.tls_cert.is_none());
    }

    #[test]
    fn test_full_settings() {
        let config = config(&[
            ("SAMP_RELAY_ADDR", "0.0.0.0:9000"),
            ("SAMP_RELAY_PROFILE", "web"),
            ("SAMP_RELAY_TLS_CERT", "/etc/relay/cert.pem"),
            ("SAMP_RELAY_TLS_KEY", "/etc/relay/key.pem"),
            ("SAMP_RELAY_TLS_CLIENT_AUTH", "optional"),
            ("SAMP_RELAY_RESTRICT_GROUP", "astro"),
            ("SAMP_RELAY_ADMIN", "root"),
            ("SAMP_RELAY_POOL_SIZE", "4"),
            ("SAMP_RELAY_DIAGNOSTICS", "true"),
        ])
        .expect("config");
        assert_eq!(config.addr.port(), 9000);
        assert_eq!(config.profile, Profile::Web);
        assert_eq!(config.client_auth, ClientAuthMode::Optional);
        assert_eq!(config.restriction.scope, RestrictionScope::Group("astro".to_string()));
        assert_eq!(config.restriction.admin.as_deref(), Some("root"));
        assert_eq!(config.pool_size, 4);
        assert!(config.diagnostics);
    }

    #[test]
    fn test_admin_only_restricts_to_admin() {
        let config = config(&[("SAMP_RELAY_ADMIN", "root")]).expect("config");
        assert_eq!(config.restriction.scope, RestrictionScope::Unrestricted);

        let store = CredentialStore::new()
            .with_user("root", "toor", &[])
            .with_user("bob", "hunter2", &["ops"]);
        assert!(config.restriction.permits(&store, "root", "toor"));
        assert!(!config.restriction.permits(&store, "bob", "hunter2"));
    }

    #[test]
    fn test_invalid_settings() {
        assert!(config(&[("SAMP_RELAY_PROFILE", "bogus")]).is_err());
        assert!(config(&[("SAMP_RELAY_ADDR", "not-an-addr")]).is_err());
        assert!(config(&[("SAMP_RELAY_TLS_CERT", "/cert.pem")]).is_err());
        assert!(config(&[
            ("SAMP_RELAY_RESTRICT_USER", "alice"),
            ("SAMP_RELAY_RESTRICT_GROUP", "astro"),
        ])
        .is_err());
        assert!(config(&[
            ("SAMP_RELAY_PROFILE", "web"),
            ("SAMP_RELAY_METRICS_PATH", "/metrics"),
        ])
        .is_err());
    }
}
