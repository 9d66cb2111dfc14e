//! Applies discovery events to the service registry.
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::{
    config::StaticServiceConfig,
    core::{endpoint::Endpoint, registry::ServiceRegistry},
    ports::discovery::{DiscoveryFeed, ServiceEvent},
    utils::ShutdownToken,
};

/// Register the services declared in configuration.
pub async fn seed_static(registry: &ServiceRegistry, services: &[StaticServiceConfig]) {
    for service in services {
        registry
            .service_updated(&service.path, Endpoint::from(service))
            .await;
    }
    if !services.is_empty() {
        tracing::info!(count = services.len(), "Registered static services");
    }
}

/// Apply a single event.
pub async fn apply_event(registry: &ServiceRegistry, event: ServiceEvent) {
    match event {
        ServiceEvent::Updated { path, endpoint } => registry.service_updated(&path, endpoint).await,
        ServiceEvent::Removed { path, endpoint } => {
            registry.service_removed(&path, &endpoint).await
        }
    }
}

/// Pump events from `feed` into `registry` until the feed ends or shutdown.
pub fn spawn_event_pump<F>(
    registry: Arc<ServiceRegistry>,
    mut feed: F,
    mut shutdown: ShutdownToken,
) -> JoinHandle<()>
where
    F: DiscoveryFeed,
{
    tokio::spawn(async move {
        tracing::info!("Discovery pump started");
        loop {
            tokio::select! {
                event = feed.next_event() => match event {
                    Some(event) => {
                        tracing::trace!(path = event.path(), "Discovery event");
                        apply_event(&registry, event).await;
                    }
                    None => {
                        tracing::info!("Discovery feed closed");
                        break;
                    }
                },
                _ = shutdown.wait_for_shutdown() => {
                    tracing::debug!("Discovery pump stopping");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::utils::{GracefulShutdown, ShutdownReason};

    fn endpoint(container: &str) -> Endpoint {
        Endpoint::new(
            "broker",
            container,
            "1.0",
            vec![format!("stomp://10.0.0.{container}:61613")],
        )
    }

    #[tokio::test]
    async fn test_seed_static() {
        let registry = ServiceRegistry::new();
        seed_static(
            &registry,
            &[StaticServiceConfig {
                path: "/fleet/broker".to_string(),
                service_id: "broker".to_string(),
                container_id: "c1".to_string(),
                version: "1.0".to_string(),
                urls: vec!["stomp://127.0.0.1:61613".to_string()],
            }],
        )
        .await;
        assert_eq!(
            registry.query("/fleet/broker").await,
            vec![Endpoint::new(
                "broker",
                "c1",
                "1.0",
                vec!["stomp://127.0.0.1:61613".to_string()]
            )]
        );
    }

    #[tokio::test]
    async fn test_pump_applies_events_in_order() {
        let registry = Arc::new(ServiceRegistry::new());
        let shutdown = GracefulShutdown::new();
        let (tx, rx) = mpsc::channel(8);

        let pump = spawn_event_pump(registry.clone(), rx, shutdown.shutdown_token());

        for container in ["1", "2"] {
            tx.send(ServiceEvent::Updated {
                path: "/vh".to_string(),
                endpoint: endpoint(container),
            })
            .await
            .unwrap();
        }
        tx.send(ServiceEvent::Removed {
            path: "/vh".to_string(),
            endpoint: endpoint("1"),
        })
        .await
        .unwrap();
        drop(tx);

        pump.await.unwrap();
        let endpoints = registry.query("/vh").await;
        assert_eq!(endpoints, vec![endpoint("2")]);
    }

    #[tokio::test]
    async fn test_pump_stops_on_shutdown() {
        let registry = Arc::new(ServiceRegistry::new());
        let shutdown = GracefulShutdown::new();
        let (_tx, rx) = mpsc::channel::<ServiceEvent>(1);

        let pump = spawn_event_pump(registry, rx, shutdown.shutdown_token());
        shutdown.trigger_shutdown(ShutdownReason::Graceful);
        pump.await.unwrap();
    }
}
