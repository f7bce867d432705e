use anyhow::{Context, Result};
use samp_proxy::{
    AccessRestriction, BasicAuthGate, ConnectOptions, CredentialStore, DispatchServer, HubProxy,
    LoggingMiddleware, MetricsCollector, MiddlewareChain, ServerConfig, TlsServerConfig, UrlFetcher,
    WebAccess,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod relay;

use config::{Profile, RelayConfig};
use relay::HubRelay;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting samp-relay...");

    let config = RelayConfig::from_env()?;
    info!("Relay profile {:?} on {}", config.profile, config.addr);

    // Connect upstream, discovering the hub from its lock file
    let mut proxy = HubProxy::new();
    let options = ConnectOptions {
        pool_size: config.pool_size,
        ..ConnectOptions::default()
    };
    proxy
        .connect(options)
        .await
        .context("Failed to connect to the upstream SAMP hub")?;

    let server_config = ServerConfig {
        bind_addr: config.addr,
        send_traceback_header: config.diagnostics,
        metrics_path: config.metrics_path.clone(),
        ..ServerConfig::default()
    };

    let mut relay = HubRelay::new(proxy);
    let web = match config.profile {
        Profile::Web => Some(WebAccess::new(Arc::new(UrlFetcher::new()?))),
        Profile::Standard => None,
    };
    if let Some(web) = &web {
        relay = relay.with_web_access(web.clone());
    }

    let mut server = DispatchServer::new(server_config, Arc::new(relay))
        .with_middleware(MiddlewareChain::new().add(LoggingMiddleware));

    if let Some(web) = web {
        server = server.with_web_access(web);
    }

    if config.metrics_path.is_some() {
        server = server.with_metrics(MetricsCollector::new()?);
        info!("Metrics collector initialized");
    }

    server = match load_tls_config(&config)? {
        Some(tls) => server.with_tls(tls),
        None => server,
    };

    match &config.auth_file {
        Some(path) => {
            let store = CredentialStore::from_file(path)
                .with_context(|| format!("Failed to load credentials from {}", path.display()))?;
            info!("Basic authentication enabled for {} users", store.len());
            server = server.with_access_gate(Arc::new(BasicAuthGate::new(
                store,
                config.restriction.clone(),
            )));
        }
        None if config.restriction != AccessRestriction::default() => {
            warn!("Access restriction configured without SAMP_RELAY_AUTH_FILE; ignoring it");
        }
        None => {}
    }

    let listener = server.bind().await?;
    tokio::select! {
        result = server.serve(listener) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down samp-relay"),
    }

    Ok(())
}

/// Load the listener's TLS configuration when a certificate is configured
fn load_tls_config(config: &RelayConfig) -> Result<Option<TlsServerConfig>> {
    match (&config.tls_cert, &config.tls_key) {
        (Some(cert_path), Some(key_path)) => {
            let tls = TlsServerConfig::from_files(
                cert_path,
                key_path,
                config.tls_ca.as_deref(),
                config.client_auth.clone(),
                config.tls_min_version.clone(),
            )?;
            info!(
                "TLS configuration loaded from {} and {}",
                cert_path.display(),
                key_path.display()
            );
            Ok(Some(tls))
        }
        _ => {
            warn!("TLS not configured - relay is listening in plain HTTP");
            Ok(None)
        }
    }
}
