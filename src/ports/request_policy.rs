//! Pluggable per-route request policies.
//!
//! Authentication and authorization live outside the gateway; a route lists
//! the names of the policies it needs and the handler looks them up here.
use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use hyper::{StatusCode, http::request::Parts};

/// Verdict of a request policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny { status: StatusCode, reason: String },
}

/// A check run on the request head before it is proxied
#[async_trait]
pub trait RequestPolicy: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn evaluate(&self, parts: &Parts, peer: Option<SocketAddr>) -> PolicyDecision;
}

/// Policies available to routes, by name
#[derive(Default, Clone)]
pub struct PolicyRegistry {
    policies: HashMap<String, Arc<dyn RequestPolicy>>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, policy: Arc<dyn RequestPolicy>) -> Self {
        self.policies.insert(policy.name().to_string(), policy);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RequestPolicy>> {
        self.policies.get(name).cloned()
    }

    /// Run `names` in order, stopping at the first denial.
    ///
    /// A name without a registered policy denies with 500.
    pub async fn evaluate(
        &self,
        names: &[String],
        parts: &Parts,
        peer: Option<SocketAddr>,
    ) -> PolicyDecision {
        for name in names {
            let Some(policy) = self.get(name) else {
                tracing::error!(policy = %name, "Route references an unknown request policy");
                return PolicyDecision::Deny {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    reason: format!("unknown request policy '{name}'"),
                };
            };
            let decision = policy.evaluate(parts, peer).await;
            if decision != PolicyDecision::Allow {
                tracing::debug!(policy = %name, ?decision, "Request denied by policy");
                return decision;
            }
        }
        PolicyDecision::Allow
    }
}
