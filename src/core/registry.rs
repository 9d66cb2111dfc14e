//! Live service registry.
//!
//! Maps a logical path to the endpoints contributed by every container that
//! currently advertises a service under it:
//! `path → service_id → container_id → Endpoint`.
//!
//! The outer map is an `scc::HashMap`, so writers only lock the bucket of the
//! path they touch and readers of other paths are never blocked. Every
//! effective mutation bumps a generation counter published on a
//! `tokio::sync::watch` channel, which is how dependants such as the HTTP
//! route mapper learn that they must rebuild.
use std::collections::HashMap as StdHashMap;

use scc::{HashMap, hash_map::Entry};
use tokio::sync::watch;

use crate::{core::endpoint::Endpoint, metrics};

type Containers = StdHashMap<String, Endpoint>;
type Services = StdHashMap<String, Containers>;

/// Concurrent path → endpoints registry fed by the discovery collaborator.
pub struct ServiceRegistry {
    paths: HashMap<String, Services>,
    generation: watch::Sender<u64>,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            paths: HashMap::new(),
            generation,
        }
    }

    /// Insert or replace the endpoint registered under `(service_id, container_id)`.
    ///
    /// Endpoints without URLs are ignored.
    pub async fn service_updated(&self, path: &str, endpoint: Endpoint) {
        if endpoint.is_withdrawal() {
            tracing::debug!(
                path,
                service = %endpoint.service_id,
                container = %endpoint.container_id,
                "Ignoring endpoint update without URLs"
            );
            return;
        }

        tracing::debug!(path, endpoint = %endpoint, "Service updated");

        let mut entry = self
            .paths
            .entry_async(path.to_string())
            .await
            .or_default();
        entry
            .get_mut()
            .entry(endpoint.service_id.clone())
            .or_default()
            .insert(endpoint.container_id.clone(), endpoint);
        drop(entry);

        self.bump_generation();
    }

    /// Remove the endpoint registered under `(service_id, container_id)`, if any.
    pub async fn service_removed(&self, path: &str, endpoint: &Endpoint) {
        let mut removed = false;

        if let Entry::Occupied(mut entry) = self.paths.entry_async(path.to_string()).await {
            let services = entry.get_mut();
            if let Some(containers) = services.get_mut(&endpoint.service_id) {
                removed = containers.remove(&endpoint.container_id).is_some();
                if containers.is_empty() {
                    services.remove(&endpoint.service_id);
                }
            }
            if services.is_empty() {
                let _ = entry.remove();
            }
        }

        if removed {
            tracing::debug!(
                path,
                service = %endpoint.service_id,
                container = %endpoint.container_id,
                "Service removed"
            );
            self.bump_generation();
        }
    }

    /// Snapshot of every endpoint registered under `path`, in no particular order.
    pub async fn query(&self, path: &str) -> Vec<Endpoint> {
        self.paths
            .read_async(path, |_, services| flatten(services))
            .await
            .unwrap_or_default()
    }

    /// All currently registered paths.
    pub async fn paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        self.paths
            .retain_async(|path, _| {
                paths.push(path.clone());
                true
            })
            .await;
        paths
    }

    /// Snapshot of the whole registry, sorted by path.
    pub async fn snapshot(&self) -> Vec<(String, Vec<Endpoint>)> {
        let mut snapshot = Vec::new();
        self.paths
            .retain_async(|path, services| {
                snapshot.push((path.clone(), flatten(services)));
                true
            })
            .await;
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        snapshot
    }

    /// Number of registered paths.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Receiver that observes a new value after every registry change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    /// Current change counter.
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    fn bump_generation(&self) {
        self.generation.send_modify(|generation| *generation += 1);
        metrics::set_registered_paths(self.paths.len());
    }
}

fn flatten(services: &Services) -> Vec<Endpoint> {
    services
        .values()
        .flat_map(|containers| containers.values().cloned())
        .collect()
}
