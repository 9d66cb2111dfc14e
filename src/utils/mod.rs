pub mod connection_tracker;
pub mod graceful_shutdown;
pub mod prefixed_stream;

pub use connection_tracker::{ConnectionId, ConnectionInfo, ConnectionTracker, GatewayStats};
pub use graceful_shutdown::{GracefulShutdown, ServiceHandle, ShutdownReason, ShutdownToken};
pub use prefixed_stream::PrefixedStream;
