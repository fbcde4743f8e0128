use crate::{
    ca::CertificateAuthority,
    combo::{ComboResolver, HttpAssetFetcher},
    config::DevProxyConfig,
    error::ProxyError,
    gate::InterceptionGate,
    handler::DevProxyHandler,
    hooks::Hooks,
    pipeline::ResponsePipeline,
    rewriter::{absolute, RequestOptionRewriter},
    static_server::start_static_server,
    Result,
};
use hudsucker::{certificate_authority::RcgenAuthority, rustls, ProxyBuilder};
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct ProxyServer {
    config: Arc<DevProxyConfig>,
    ca: CertificateAuthority,
    hooks: Hooks,
}

impl ProxyServer {
    pub fn new(config: DevProxyConfig, ca: CertificateAuthority) -> Self {
        Self {
            config: Arc::new(config),
            ca,
            hooks: Hooks::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Build the request handler shared by every proxied connection.
    pub fn handler(&self) -> Result<DevProxyHandler> {
        let fetcher = Arc::new(HttpAssetFetcher::new()?);
        let combo = ComboResolver::from_config(&self.config, fetcher)?;
        Ok(DevProxyHandler::new(
            InterceptionGate::new(self.config.clone(), self.hooks.clone(), combo),
            RequestOptionRewriter::new(self.config.clone()),
            ResponsePipeline::new(self.config.clone(), self.hooks.clone()),
            self.config.cors_inject,
        ))
    }

    /// Run the static server and the proxy until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let ip: IpAddr = self.config.listen_address.parse().map_err(|e| {
            ProxyError::Configuration(format!(
                "Invalid listen address {}: {}",
                self.config.listen_address, e
            ))
        })?;
        let addr = SocketAddr::new(ip, self.config.proxy_port);
        info!("Starting proxy server on {}", addr);

        let hosts = self.config.host_set();
        if hosts.is_empty() {
            warn!("No proxied hosts configured, pages are never served locally");
        }
        for host in hosts.hosts() {
            info!("Proxying {}", host);
        }

        let static_addr = SocketAddr::from(([127, 0, 0, 1], self.config.server_port));
        let content_base = absolute(&self.config.content_base);
        let static_server = tokio::spawn(async move {
            if let Err(e) = start_static_server(static_addr, content_base).await {
                error!("Static server failed: {}", e);
            }
        });

        // Hudsucker/Rustls expects DER, not PEM.
        let private_key = rustls::PrivateKey(self.ca.ca_key_der());
        let ca_cert = rustls::Certificate(self.ca.ca_cert_der()?);

        let authority = RcgenAuthority::new(private_key, ca_cert, 1000).map_err(|e| {
            ProxyError::Certificate(format!("Failed to create CA authority: {}", e))
        })?;

        let proxy = ProxyBuilder::new()
            .with_addr(addr)
            .with_rustls_client()
            .with_ca(authority)
            .with_http_handler(self.handler()?)
            .build();

        info!("Trust {} to intercept HTTPS hosts", self.ca.trust_path().display());
        let result = proxy
            .start(shutdown)
            .await
            .map_err(|e| ProxyError::Network(format!("Proxy failed: {}", e)));

        static_server.abort();
        result
    }
}
