//! Fleet gateway - a protocol-detecting TCP and HTTP gateway for container fleets.
//!
//! Backends announce themselves through a discovery feed into the
//! [`ServiceRegistry`]. Two front ends route traffic to them:
//!
//! - [`DetectingGateway`] listens on a TCP port, classifies each connection
//!   from its first bytes (STOMP, MQTT, AMQP, OpenWire, HTTP, optionally
//!   wrapped in TLS), resolves a virtual host and splices the socket to a
//!   backend picked by a load balancer.
//! - [`HttpGatewayHandler`] proxies HTTP requests by longest path prefix,
//!   using routes derived from configuration and from the registry by the
//!   [`RouteMapper`].
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use fleet_gateway::{
//!     ConnectionTracker, DetectingGateway, ServiceRegistry,
//!     config::{DetectingListenerConfig, ProtocolKind, TimeoutConfig},
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let registry = Arc::new(ServiceRegistry::new());
//! let listener = DetectingListenerConfig::new(
//!     "brokers",
//!     "0.0.0.0:61613",
//!     vec![ProtocolKind::Stomp, ProtocolKind::Mqtt],
//! );
//! let gateway = Arc::new(DetectingGateway::new(
//!     &listener,
//!     &TimeoutConfig::default(),
//!     registry,
//!     Arc::new(ConnectionTracker::new()),
//!     None,
//! ));
//! let handle = gateway.start(&listener.listen_addr).await?;
//! # handle.stop().await;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! Seams to the outside world are traits in `ports` (backend HTTP client,
//! request policies, discovery feed); their implementations live in
//! `adapters`. Registry, detection, routing and load balancing live in `core`.
//!
//! # Concurrency & Data Structures
//! Shared maps (registry, connection lists, per-route balancers) are
//! `scc::HashMap`s; the route table is republished through `arc-swap`.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{DetectingGateway, HttpClientAdapter, HttpGatewayHandler},
    core::{CallDetailLog, RouteMapper, ServiceRegistry},
    ports::{http_client::HttpClient, request_policy::PolicyRegistry},
    utils::{ConnectionTracker, GracefulShutdown},
};
