pub mod discovery;
pub mod http_client;
pub mod request_policy;

pub use discovery::{DiscoveryFeed, ServiceEvent};
pub use http_client::{HttpClient, HttpClientError, HttpClientResult};
pub use request_policy::{PolicyDecision, PolicyRegistry, RequestPolicy};
