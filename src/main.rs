use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;

use portico::config::{ConfigValidator, load_config};
use portico::{
    GatewayHandler, GatewayServer, GracefulShutdown, HttpServer, RouteTable, ServerSettings,
    TcpTlsConnector, TokioFileSystem, metrics, tracing_setup,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(short, long, default_value = "config.yaml")]
    config: String,

    /// Listen on this address instead of the configured one
    #[clap(short, long)]
    listen: Option<String>,

    /// Validate the configuration and exit
    #[clap(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_setup::init_tracing().map_err(|e| anyhow!("Failed to initialize tracing: {e}"))?;

    // Installed once for the process; https upstreams use it.
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("A rustls crypto provider was already installed");
    }

    let args = Args::parse();

    tracing::info!(path = %args.config, "Loading configuration");
    let mut config = load_config(&args.config)
        .await
        .with_context(|| format!("Failed to load configuration from {}", args.config))?;
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    ConfigValidator::validate(&config).context("Invalid configuration")?;

    let routes = RouteTable::from_config(&config.routes).context("Failed to build route table")?;
    for (index, route) in routes.iter().enumerate() {
        tracing::info!(
            index,
            action = route.action().as_str(),
            prefix = route.prefix(),
            methods = route.method_filter().map_or("*", |filter| filter.as_str()),
            target = route.options().target.as_deref().unwrap_or(""),
            "Configured route"
        );
    }

    if args.check {
        tracing::info!(routes = routes.len(), "Configuration is valid");
        return Ok(());
    }

    if let Some(addr) = &config.metrics_addr {
        let addr: SocketAddr = addr
            .parse()
            .with_context(|| format!("Invalid metrics address: {addr}"))?;
        metrics::install_prometheus_exporter(addr)?;
        tracing::info!(%addr, "Prometheus exporter listening");
    }

    let handler = Arc::new(GatewayHandler::new(
        Arc::new(routes),
        Arc::new(TokioFileSystem::new()),
        Arc::new(TcpTlsConnector::new()),
    ));

    let shutdown = Arc::new(GracefulShutdown::new());
    let signals = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signals.run_signal_handler().await {
            tracing::error!(error = %e, "Signal handler failed");
        }
    });

    let server = GatewayServer::new(handler, ServerSettings::from_config(&config), shutdown);
    server.run().await
}
