use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use rand::Rng;
use thiserror::Error;

use crate::config::{LoadBalanceStrategy, LoadBalancerConfig};

/// Errors returned by load balancing strategies
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LoadBalanceError {
    /// The candidate list was empty
    #[error("No endpoint available")]
    NoEndpoint,
}

/// Trait defining the interface for load balancing strategies.
///
/// Strategies never mutate the candidate list; a changed list is simply read on
/// the next call.
pub trait LoadBalancingStrategy: Send + Sync + 'static {
    /// Select a target from a list of targets, optionally keyed by a client key
    fn select_target(&self, targets: &[String], key: Option<&str>)
    -> Result<String, LoadBalanceError>;
    /// Name of the strategy, used in logs
    fn name(&self) -> &'static str;
    /// Create a new instance of this strategy as a boxed trait object
    fn boxed(self) -> Box<dyn LoadBalancingStrategy>
    where
        Self: Sized,
    {
        Box::new(self)
    }
}

/// Round-robin load balancing strategy
pub struct RoundRobinStrategy {
    counter: AtomicUsize,
}

impl Default for RoundRobinStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundRobinStrategy {
    /// Create a new round-robin strategy
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl LoadBalancingStrategy for RoundRobinStrategy {
    fn select_target(
        &self,
        targets: &[String],
        _key: Option<&str>,
    ) -> Result<String, LoadBalanceError> {
        if targets.is_empty() {
            return Err(LoadBalanceError::NoEndpoint);
        }
        let count = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(targets[count % targets.len()].clone())
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

/// Random selection load balancing strategy
pub struct RandomStrategy;

impl Default for RandomStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomStrategy {
    /// Create a new random selection strategy
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancingStrategy for RandomStrategy {
    fn select_target(
        &self,
        targets: &[String],
        _key: Option<&str>,
    ) -> Result<String, LoadBalanceError> {
        if targets.is_empty() {
            return Err(LoadBalanceError::NoEndpoint);
        }
        let index = rand::rng().random_range(0..targets.len());
        Ok(targets[index].clone())
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

/// Bounded key → target cache evicting the oldest inserted key first.
#[derive(Default)]
struct StickyCache {
    entries: HashMap<String, String>,
    order: VecDeque<String>,
}

impl StickyCache {
    fn get(&self, key: &str) -> Option<&String> {
        self.entries.get(key)
    }

    fn insert(&mut self, key: &str, target: String, capacity: usize) {
        if self.entries.insert(key.to_string(), target).is_some() {
            self.order.retain(|existing| existing != key);
        }
        self.order.push_back(key.to_string());

        while self.entries.len() > capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Sticky strategy: the same client key keeps its target while that target
/// remains a candidate. New keys are assigned round robin.
pub struct StickyStrategy {
    fallback: RoundRobinStrategy,
    capacity: usize,
    cache: Mutex<StickyCache>,
}

impl StickyStrategy {
    /// Create a sticky strategy remembering at most `capacity` keys
    pub fn new(capacity: usize) -> Self {
        Self {
            fallback: RoundRobinStrategy::new(),
            capacity: capacity.max(1),
            cache: Mutex::new(StickyCache::default()),
        }
    }

    /// Number of keys currently remembered
    pub fn cached_keys(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl LoadBalancingStrategy for StickyStrategy {
    fn select_target(
        &self,
        targets: &[String],
        key: Option<&str>,
    ) -> Result<String, LoadBalanceError> {
        let Some(key) = key else {
            return self.fallback.select_target(targets, None);
        };

        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = cache.get(key) {
            if targets.contains(cached) {
                return Ok(cached.clone());
            }
        }

        let chosen = self.fallback.select_target(targets, None)?;
        cache.insert(key, chosen.clone(), self.capacity);
        Ok(chosen)
    }

    fn name(&self) -> &'static str {
        "sticky"
    }
}

/// Factory for creating load balancing strategies from configuration
pub struct LoadBalancerFactory;

impl LoadBalancerFactory {
    /// Create a new load balancing strategy based on configuration
    pub fn create_strategy(config: &LoadBalancerConfig) -> Box<dyn LoadBalancingStrategy> {
        match config.strategy {
            LoadBalanceStrategy::RoundRobin => RoundRobinStrategy::new().boxed(),
            LoadBalanceStrategy::Random => RandomStrategy::new().boxed(),
            LoadBalanceStrategy::Sticky => StickyStrategy::new(config.sticky_capacity).boxed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn test_round_robin_strategy() {
        let strategy = RoundRobinStrategy::new();
        let targets = targets(&["e1", "e2"]);

        assert_eq!(strategy.select_target(&targets, None), Ok("e1".to_string()));
        assert_eq!(strategy.select_target(&targets, None), Ok("e2".to_string()));
        assert_eq!(strategy.select_target(&targets, None), Ok("e1".to_string())); // Wraps around
    }

    #[test]
    fn test_round_robin_empty_targets() {
        let strategy = RoundRobinStrategy::new();
        assert_eq!(
            strategy.select_target(&[], None),
            Err(LoadBalanceError::NoEndpoint)
        );
    }

    #[test]
    fn test_random_strategy() {
        let strategy = RandomStrategy::new();
        let targets = targets(&["server1", "server2", "server3"]);

        let selected = strategy.select_target(&targets, None).unwrap();
        assert!(targets.contains(&selected));
        assert_eq!(
            strategy.select_target(&[], None),
            Err(LoadBalanceError::NoEndpoint)
        );
    }

    #[test]
    fn test_sticky_keeps_target_for_same_key() {
        let strategy = StickyStrategy::new(16);
        let targets = targets(&["e1", "e2", "e3"]);

        let first = strategy.select_target(&targets, Some("client-a")).unwrap();
        for _ in 0..5 {
            assert_eq!(
                strategy.select_target(&targets, Some("client-a")).unwrap(),
                first
            );
        }

        // Another key moves the cursor but does not disturb client-a
        let other = strategy.select_target(&targets, Some("client-b")).unwrap();
        assert_ne!(other, first);
        assert_eq!(
            strategy.select_target(&targets, Some("client-a")).unwrap(),
            first
        );
    }

    #[test]
    fn test_sticky_reassigns_when_target_disappears() {
        let strategy = StickyStrategy::new(16);
        let all = targets(&["e1", "e2"]);

        let first = strategy.select_target(&all, Some("client")).unwrap();
        let remaining: Vec<String> = all.iter().filter(|t| **t != first).cloned().collect();

        let second = strategy.select_target(&remaining, Some("client")).unwrap();
        assert_ne!(second, first);

        // The cache now points at the new target, even when the old one comes back
        assert_eq!(strategy.select_target(&all, Some("client")).unwrap(), second);
    }

    #[test]
    fn test_sticky_evicts_oldest_inserted_key() {
        let strategy = StickyStrategy::new(2);
        let targets = targets(&["e1", "e2", "e3"]);

        let a = strategy.select_target(&targets, Some("a")).unwrap();
        strategy.select_target(&targets, Some("b")).unwrap();
        strategy.select_target(&targets, Some("c")).unwrap();
        assert_eq!(strategy.cached_keys(), 2);

        // "a" was evicted, so it gets the next round robin target instead of its old one
        let again = strategy.select_target(&targets, Some("a")).unwrap();
        assert_eq!(again, "e1");
        assert_eq!(a, "e1");
        assert_eq!(strategy.cached_keys(), 2);
        // "c" survived both evictions
        assert_eq!(strategy.select_target(&targets, Some("c")).unwrap(), "e3");
    }

    #[test]
    fn test_sticky_without_key_behaves_round_robin() {
        let strategy = StickyStrategy::new(4);
        let targets = targets(&["e1", "e2"]);
        assert_eq!(strategy.select_target(&targets, None), Ok("e1".to_string()));
        assert_eq!(strategy.select_target(&targets, None), Ok("e2".to_string()));
        assert_eq!(strategy.cached_keys(), 0);
        assert_eq!(
            strategy.select_target(&[], Some("k")),
            Err(LoadBalanceError::NoEndpoint)
        );
    }

    #[test]
    fn test_load_balancer_factory() {
        let targets = targets(&["server1", "server2"]);

        for strategy in [
            LoadBalanceStrategy::RoundRobin,
            LoadBalanceStrategy::Random,
            LoadBalanceStrategy::Sticky,
        ] {
            let balancer =
                LoadBalancerFactory::create_strategy(&LoadBalancerConfig::with_strategy(strategy));
            assert_eq!(balancer.name(), strategy.to_string());
            assert!(balancer.select_target(&targets, Some("key")).is_ok());
        }
    }
}
