//! Seam for the external service discovery collaborator.
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::endpoint::Endpoint;

/// A change announced by service discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    Updated { path: String, endpoint: Endpoint },
    Removed { path: String, endpoint: Endpoint },
}

impl ServiceEvent {
    pub fn path(&self) -> &str {
        match self {
            ServiceEvent::Updated { path, .. } | ServiceEvent::Removed { path, .. } => path,
        }
    }
}

/// Source of [`ServiceEvent`]s; `None` means the feed has ended.
#[async_trait]
pub trait DiscoveryFeed: Send + 'static {
    async fn next_event(&mut self) -> Option<ServiceEvent>;
}

#[async_trait]
impl DiscoveryFeed for mpsc::Receiver<ServiceEvent> {
    async fn next_event(&mut self) -> Option<ServiceEvent> {
        self.recv().await
    }
}
