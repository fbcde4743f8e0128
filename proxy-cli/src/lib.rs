//! DevProxy Binary
//!
//! Local development proxy: decrypts configured hosts, serves local content,
//! mocks APIs and rewrites pages according to `devproxy.json`.

use anyhow::Context;
use clap::Parser;
use devproxy_core::{CertificateAuthority, DevProxyConfig, Hooks, ProxyServer, ReloadingHooks};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

pub mod logging;


#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file (JSON); its `hooks` section is re-read on every use
    #[arg(long, short, default_value = "devproxy.json")]
    pub config: PathBuf,

    /// Port the proxy listens on
    #[arg(long)]
    pub proxy_port: Option<u16>,

    /// Port of the local static content server
    #[arg(long)]
    pub server_port: Option<u16>,

    /// Local content root
    #[arg(long)]
    pub content_base: Option<PathBuf>,

    /// Directory holding the root CA (ca.pem / ca.key / ca.crt)
    #[arg(long)]
    pub cert_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,
}

/// Load the configuration file and apply command-line overrides.
///
/// A missing file yields the defaults; an invalid one is an error.
pub fn load_config(args: &Args) -> anyhow::Result<DevProxyConfig> {
    let mut config = if args.config.exists() {
        DevProxyConfig::load(&args.config)
            .with_context(|| format!("Failed to load {}", args.config.display()))?
    } else {
        tracing::warn!(
            "Config file {} not found, using defaults",
            args.config.display()
        );
        DevProxyConfig::default()
    };

    if let Some(port) = args.proxy_port {
        config.proxy_port = port;
    }
    if let Some(port) = args.server_port {
        config.server_port = port;
    }
    if let Some(base) = &args.content_base {
        config.content_base = base.clone();
    }
    if let Some(dir) = &args.cert_dir {
        config.cert_dir = dir.clone();
    }

    config.validate()?;
    Ok(config)
}

pub async fn run<F>(args: Args, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let config = load_config(&args)?;

    tracing::info!("Starting DevProxy...");
    tracing::info!("  Proxy:   {}:{}", config.listen_address, config.proxy_port);
    tracing::info!(
        "  Static:  127.0.0.1:{} <- {}",
        config.server_port,
        config.content_base.display()
    );

    let ca = CertificateAuthority::new(&config.cert_dir)
        .with_context(|| format!("Failed to initialise CA in {}", config.cert_dir.display()))?;

    let hooks = Hooks::from_all(Arc::new(ReloadingHooks::new(&args.config)));
    let server = ProxyServer::new(config, ca).with_hooks(hooks);

    server.run(shutdown).await?;
    Ok(())
}
