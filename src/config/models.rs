//! Configuration data structures for the fleet gateway.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files. They are
//! serde‑friendly and include defaults so that minimal configs remain concise.
//! Builders and enums here are part of the public API for embedding.
use std::fmt;

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_http_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_virtual_host() -> String {
    "default".to_string()
}

fn default_max_detection_bytes() -> usize {
    8192
}

fn default_sticky_capacity() -> usize {
    1024
}

fn default_file_extensions() -> Vec<String> {
    [
        "html", "htm", "jsp", "js", "css", "png", "jpg", "jpeg", "gif", "ico", "svg", "json",
        "xml", "txt",
    ]
    .iter()
    .map(|ext| ext.to_string())
    .collect()
}

/// Root configuration of a gateway process.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct GatewayConfig {
    /// HTTP gateway surface
    #[serde(default)]
    pub http: HttpGatewayConfig,
    /// Protocol detecting TCP listeners, one per protocol group
    #[serde(default)]
    pub listeners: Vec<DetectingListenerConfig>,
    /// Certificate material used by listeners that accept TLS
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Services registered at start-up, before any discovery event arrives
    #[serde(default)]
    pub services: Vec<StaticServiceConfig>,
}

impl GatewayConfig {
    /// Create a new gateway configuration builder
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }

    /// Whether any listener needs a TLS acceptor.
    pub fn requires_tls(&self) -> bool {
        self.listeners
            .iter()
            .any(|listener| listener.protocols.contains(&ProtocolKind::Tls))
    }
}

/// HTTP gateway configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HttpGatewayConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_http_listen_addr")]
    pub listen_addr: String,
    /// Serve the JSON route index on `/`
    #[serde(default = "default_true")]
    pub index_enabled: bool,
    /// Extensions for which a trailing slash is dropped from the forwarded suffix
    #[serde(default = "default_file_extensions")]
    pub file_extensions: Vec<String>,
    /// Routes with fixed targets, declared before any mapped route
    #[serde(default)]
    pub routes: Vec<StaticRouteConfig>,
    /// Rules turning registry paths into routes
    #[serde(default)]
    pub mapping_rules: Vec<MappingRuleConfig>,
}

impl Default for HttpGatewayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: default_http_listen_addr(),
            index_enabled: true,
            file_extensions: default_file_extensions(),
            routes: Vec::new(),
            mapping_rules: Vec::new(),
        }
    }
}

/// A route whose backend base URLs are fixed in configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StaticRouteConfig {
    pub prefix: String,
    pub targets: Vec<String>,
    #[serde(default)]
    pub load_balancer: LoadBalancerConfig,
    /// Names of request policies evaluated before proxying
    #[serde(default)]
    pub policies: Vec<String>,
    /// Rewrite backend `Location` style headers to the gateway prefix
    #[serde(default)]
    pub rewrite: bool,
}

/// Derives HTTP routes from registry paths.
///
/// Every registry path below `registry_prefix` yields a route whose prefix is
/// `uri_template` with `{path}` replaced by the path remainder and `{version}`
/// by the endpoint version.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MappingRuleConfig {
    pub registry_prefix: String,
    pub uri_template: String,
    /// Only endpoints with these versions are routed (all when empty)
    #[serde(default)]
    pub enabled_versions: Vec<String>,
    #[serde(default)]
    pub load_balancer: LoadBalancerConfig,
    #[serde(default)]
    pub policies: Vec<String>,
    #[serde(default)]
    pub rewrite: bool,
}

/// A protocol detecting TCP listener.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DetectingListenerConfig {
    pub name: String,
    pub listen_addr: String,
    /// Protocols in matcher priority order
    pub protocols: Vec<ProtocolKind>,
    /// Virtual host used when the protocol does not declare one
    #[serde(default = "default_virtual_host")]
    pub default_virtual_host: String,
    /// Prepended to the virtual host to form the registry path
    #[serde(default)]
    pub virtual_host_prefix: String,
    #[serde(default)]
    pub load_balancer: LoadBalancerConfig,
    /// Upper bound on bytes buffered while classifying a connection
    #[serde(default = "default_max_detection_bytes")]
    pub max_detection_bytes: usize,
}

impl DetectingListenerConfig {
    /// Listener with default virtual host settings for the given protocols.
    pub fn new(
        name: impl Into<String>,
        listen_addr: impl Into<String>,
        protocols: Vec<ProtocolKind>,
    ) -> Self {
        Self {
            name: name.into(),
            listen_addr: listen_addr.into(),
            protocols,
            default_virtual_host: default_virtual_host(),
            virtual_host_prefix: String::new(),
            load_balancer: LoadBalancerConfig::default(),
            max_detection_bytes: default_max_detection_bytes(),
        }
    }
}

/// Load balancer selection for a route or listener.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LoadBalancerConfig {
    #[serde(default)]
    pub strategy: LoadBalanceStrategy,
    /// Maximum number of remembered client keys for the sticky strategy
    #[serde(default = "default_sticky_capacity")]
    pub sticky_capacity: usize,
    /// Where HTTP requests take their sticky key from
    #[serde(default)]
    pub sticky_key: StickyKeySource,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            strategy: LoadBalanceStrategy::default(),
            sticky_capacity: default_sticky_capacity(),
            sticky_key: StickyKeySource::default(),
        }
    }
}

impl LoadBalancerConfig {
    pub fn with_strategy(strategy: LoadBalanceStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalanceStrategy {
    #[default]
    #[serde(rename = "round_robin")]
    RoundRobin,
    #[serde(rename = "random")]
    Random,
    #[serde(rename = "sticky")]
    Sticky,
}

impl fmt::Display for LoadBalanceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadBalanceStrategy::RoundRobin => write!(f, "round_robin"),
            LoadBalanceStrategy::Random => write!(f, "random"),
            LoadBalanceStrategy::Sticky => write!(f, "sticky"),
        }
    }
}

/// Source of the sticky key for HTTP requests.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum StickyKeySource {
    /// The client's remote IP address
    #[default]
    ClientAddress,
    /// Value of a request header
    Header { name: String },
    /// Value of a cookie
    Cookie { name: String },
}

/// Wire protocols the detecting gateway can recognise.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    Stomp,
    Mqtt,
    Amqp,
    #[serde(rename = "openwire")]
    OpenWire,
    Http,
    Tls,
}

impl ProtocolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolKind::Stomp => "stomp",
            ProtocolKind::Mqtt => "mqtt",
            ProtocolKind::Amqp => "amqp",
            ProtocolKind::OpenWire => "openwire",
            ProtocolKind::Http => "http",
            ProtocolKind::Tls => "tls",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PEM certificate chain and private key for TLS termination.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TlsConfig {
    pub cert_path: String,
    pub key_path: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Overall deadline for classifying a connection, measured from accept
    pub detection_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Time allowed for a backend to produce response headers
    pub response_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            detection_timeout_ms: 5000,
            connect_timeout_ms: 5000,
            response_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    pub include_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
            include_spans: false,
        }
    }
}

/// An endpoint registered from configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StaticServiceConfig {
    pub path: String,
    pub service_id: String,
    pub container_id: String,
    #[serde(default)]
    pub version: String,
    pub urls: Vec<String>,
}

/// Builder for GatewayConfig to allow for cleaner configuration creation
#[derive(Default)]
pub struct GatewayConfigBuilder {
    http: HttpGatewayConfig,
    listeners: Vec<DetectingListenerConfig>,
    tls: Option<TlsConfig>,
    timeouts: TimeoutConfig,
    logging: LoggingConfig,
    services: Vec<StaticServiceConfig>,
}

impl GatewayConfigBuilder {
    /// Set the HTTP listen address
    pub fn http_listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.http.listen_addr = addr.into();
        self
    }

    /// Enable or disable the HTTP gateway
    pub fn http_enabled(mut self, enabled: bool) -> Self {
        self.http.enabled = enabled;
        self
    }

    /// Enable or disable the route index
    pub fn index_enabled(mut self, enabled: bool) -> Self {
        self.http.index_enabled = enabled;
        self
    }

    /// Add a static HTTP route
    pub fn route(mut self, route: StaticRouteConfig) -> Self {
        self.http.routes.push(route);
        self
    }

    /// Add a registry mapping rule
    pub fn mapping_rule(mut self, rule: MappingRuleConfig) -> Self {
        self.http.mapping_rules.push(rule);
        self
    }

    /// Add a detecting listener
    pub fn listener(mut self, listener: DetectingListenerConfig) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Set TLS certificate paths
    pub fn tls(mut self, cert_path: impl Into<String>, key_path: impl Into<String>) -> Self {
        self.tls = Some(TlsConfig {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        });
        self
    }

    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    /// Register a service at start-up
    pub fn service(mut self, service: StaticServiceConfig) -> Self {
        self.services.push(service);
        self
    }

    /// Build the final GatewayConfig
    pub fn build(self) -> Result<GatewayConfig, String> {
        if !self.http.enabled && self.listeners.is_empty() {
            return Err("At least one HTTP gateway or detecting listener must be enabled".to_string());
        }

        Ok(GatewayConfig {
            http: self.http,
            listeners: self.listeners,
            tls: self.tls,
            timeouts: self.timeouts,
            logging: self.logging,
            services: self.services,
        })
    }
}
