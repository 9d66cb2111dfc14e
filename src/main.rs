use std::{path::Path, sync::Arc};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use fleet_gateway::{
    adapters::{DetectingGateway, HttpClientAdapter, HttpGatewayHandler, discovery, http_server, tls},
    config::{GatewayConfig, GatewayConfigValidator, load_config},
    core::{CallDetailLog, RouteMapper, ServiceRegistry},
    metrics,
    ports::{discovery::ServiceEvent, http_client::HttpClient, request_policy::PolicyRegistry},
    tracing_setup,
    utils::{ConnectionTracker, GracefulShutdown, ServiceHandle},
};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Start the gateway (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Serve { config }) => serve(&config).await,
        None => serve(&args.config).await,
    }
}

async fn serve(config_path: &str) -> Result<()> {
    let config = load_config(config_path)
        .await
        .with_context(|| format!("Failed to load configuration from {config_path}"))?;
    GatewayConfigValidator::validate(&config)
        .map_err(|e| eyre!("Invalid configuration:\n{e}"))?;

    tracing_setup::init_tracing(&config.logging)?;
    metrics::init_metrics();

    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let shutdown = Arc::new(GracefulShutdown::new());
    let registry = Arc::new(ServiceRegistry::new());
    let tracker = Arc::new(ConnectionTracker::new());

    discovery::seed_static(&registry, &config.services).await;
    // Cluster membership integrations feed this channel when embedded
    let (discovery_tx, discovery_rx) = mpsc::channel::<ServiceEvent>(1024);
    let pump = discovery::spawn_event_pump(registry.clone(), discovery_rx, shutdown.shutdown_token());

    let mut handles = start_detecting_listeners(&config, &registry, &tracker).await?;

    let mut mapper_task = None;
    if config.http.enabled {
        let mapper = Arc::new(RouteMapper::new(registry.clone(), &config.http));
        mapper.refresh().await;
        mapper_task = Some(mapper.clone().spawn_watcher(shutdown.shutdown_token()));

        let http_client: Arc<dyn HttpClient> = Arc::new(HttpClientAdapter::new(&config.timeouts)?);
        let handler = Arc::new(HttpGatewayHandler::new(
            mapper,
            http_client,
            PolicyRegistry::new(),
            Arc::new(CallDetailLog::new()),
            &config.http,
        ));
        handles.push(http_server::start(handler, &config.http.listen_addr).await?);
    }

    if handles.is_empty() {
        return Err(eyre!("Nothing to serve: no listeners and the HTTP gateway is disabled"));
    }

    tracing::info!(
        listeners = config.listeners.len(),
        http = config.http.enabled,
        "Fleet gateway started"
    );

    shutdown.run_signal_handler().await?;

    for handle in handles {
        handle.stop().await;
    }
    drop(discovery_tx);
    if let Err(e) = pump.await {
        tracing::warn!("Discovery pump task failed: {}", e);
    }
    if let Some(task) = mapper_task {
        if let Err(e) = task.await {
            tracing::warn!("Route mapper task failed: {}", e);
        }
    }

    tracker.wait_for_drain(shutdown.drain_timeout()).await;
    let stats = tracker.stats();
    tracing::info!(
        received = stats.received,
        failed = stats.failed,
        successful = stats.successful,
        "Graceful shutdown completed"
    );
    Ok(())
}

async fn start_detecting_listeners(
    config: &GatewayConfig,
    registry: &Arc<ServiceRegistry>,
    tracker: &Arc<ConnectionTracker>,
) -> Result<Vec<ServiceHandle>> {
    let acceptor = match &config.tls {
        Some(tls_config) if config.requires_tls() => Some(
            tls::acceptor(tls_config).context("Failed to load TLS certificate material")?,
        ),
        _ => None,
    };

    let mut handles = Vec::with_capacity(config.listeners.len());
    for listener in &config.listeners {
        let gateway = Arc::new(DetectingGateway::new(
            listener,
            &config.timeouts,
            registry.clone(),
            tracker.clone(),
            acceptor.clone(),
        ));
        handles.push(gateway.start(&listener.listen_addr).await?);
    }
    Ok(handles)
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    };

    match GatewayConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            for listener in &config.listeners {
                let protocols: Vec<&str> = listener.protocols.iter().map(|p| p.as_str()).collect();
                println!(
                    "   • Listener '{}' on {}: {}",
                    listener.name,
                    listener.listen_addr,
                    protocols.join(", ")
                );
            }
            println!(
                "   • HTTP Gateway: {}",
                if config.http.enabled {
                    config.http.listen_addr.as_str()
                } else {
                    "disabled"
                }
            );
            println!("   • Static Routes: {}", config.http.routes.len());
            println!("   • Mapping Rules: {}", config.http.mapping_rules.len());
            println!("   • Static Services: {}", config.services.len());
            println!("   • TLS Configured: {}", config.tls.is_some());
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Ensure backend URLs carry a scheme such as http:// or stomp://");
            println!("   • Add a [tls] section when a listener accepts tls");
            println!("   • Verify listen address format (e.g., '127.0.0.1:61613')");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# Fleet Gateway Configuration

[timeouts]
detection_timeout_ms = 5000
connect_timeout_ms = 5000
response_timeout_ms = 30000

[logging]
level = "info"
json = false

# Messaging protocols detected on one port
[[listeners]]
name = "brokers"
listen_addr = "0.0.0.0:61616"
protocols = ["stomp", "mqtt", "amqp", "openwire"]
default_virtual_host = "broker"
virtual_host_prefix = "/fleet/vhosts/"

[listeners.load_balancer]
strategy = "sticky"
sticky_capacity = 1024

# HTTP gateway
[http]
listen_addr = "0.0.0.0:8080"
index_enabled = true

# Every registry path under /fleet/web becomes an HTTP prefix
[[http.mapping_rules]]
registry_prefix = "/fleet/web/"
uri_template = "/{path}"

# Example: a fixed route
# [[http.routes]]
# prefix = "/legacy"
# targets = ["http://localhost:3001", "http://localhost:3002"]

# Example: an endpoint registered at start-up
# [[services]]
# path = "/fleet/vhosts/broker"
# service_id = "broker"
# container_id = "local"
# urls = ["stomp://127.0.0.1:61613"]
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'fleet-gateway serve --config {config_path}' to start the gateway");
    Ok(())
}
