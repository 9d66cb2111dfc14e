pub mod detecting_gateway;
pub mod discovery;
pub mod http_client;
pub mod http_handler;
pub mod http_server;
pub mod tls;

/// Re-export commonly used types from adapters
pub use detecting_gateway::{ConnectionError, DetectingGateway};
pub use http_client::HttpClientAdapter;
pub use http_handler::{GatewayError, HttpGatewayHandler};
