pub mod cdr;
pub mod detection;
pub mod endpoint;
pub mod load_balancer;
pub mod protocol;
pub mod registry;
pub mod routing;

pub use cdr::{CallDetailLog, CallDetailRecord};
pub use detection::{ConnectionPhase, ConnectionState, DetectionOutcome, DetectionState};
pub use endpoint::Endpoint;
pub use load_balancer::{LoadBalanceError, LoadBalancerFactory, LoadBalancingStrategy};
pub use protocol::{Detection, MatcherSet, ProtocolMatcher};
pub use registry::ServiceRegistry;
pub use routing::{MappedRoute, RouteMapper, RouteTable};
