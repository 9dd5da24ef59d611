use std::sync::Arc;
use std::time::Duration;

use rustls::RootCertStore;
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::core::{Scheme, UpstreamTarget};
use crate::ports::upstream::{
    ConnectFuture, UpstreamConnector, UpstreamError, UpstreamResult, UpstreamStream,
};

/// Opens plain TCP connections for `http` targets and rustls sessions for
/// `https` targets, trusting the platform's root certificates.
#[derive(Clone)]
pub struct TcpTlsConnector {
    tls: TlsConnector,
}

impl TcpTlsConnector {
    pub fn new() -> Self {
        let mut roots = RootCertStore::empty();
        match rustls_native_certs::load_native_certs() {
            Ok(certs) => {
                let (added, ignored) = roots.add_parsable_certificates(certs);
                tracing::info!(added, ignored, "Loaded native root certificates");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not load native root certificates; https upstreams will fail verification");
            }
        }

        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Self {
            tls: TlsConnector::from(Arc::new(config)),
        }
    }

    async fn open(&self, target: &UpstreamTarget) -> UpstreamResult<UpstreamStream> {
        let addr = target.authority();
        let tcp = TcpStream::connect(&addr)
            .await
            .map_err(|source| UpstreamError::Connect {
                addr: addr.clone(),
                source,
            })?;
        let _ = tcp.set_nodelay(true);

        match target.scheme {
            Scheme::Http => Ok(Box::new(tcp)),
            Scheme::Https => {
                let server_name = ServerName::try_from(target.host.clone())
                    .map_err(|_| UpstreamError::InvalidServerName(target.host.clone()))?;
                let tls = self
                    .tls
                    .connect(server_name, tcp)
                    .await
                    .map_err(|source| UpstreamError::Tls { addr, source })?;
                Ok(Box::new(tls))
            }
        }
    }
}

impl Default for TcpTlsConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl UpstreamConnector for TcpTlsConnector {
    fn connect<'a>(&'a self, target: &'a UpstreamTarget, timeout: Option<Duration>) -> ConnectFuture<'a> {
        Box::pin(async move {
            let Some(limit) = timeout else {
                return self.open(target).await;
            };
            match tokio::time::timeout(limit, self.open(target)).await {
                Ok(result) => result,
                Err(_) => Err(UpstreamError::Timeout {
                    addr: target.authority(),
                    timeout: limit,
                }),
            }
        })
    }
}
