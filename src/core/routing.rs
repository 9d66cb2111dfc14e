//! HTTP path-prefix routing.
//!
//! The [`RouteMapper`] turns static routes and registry-driven mapping rules
//! into an immutable [`RouteTable`], republished atomically whenever the
//! registry changes. Request handlers only ever `load` the current table.
use std::{
    collections::{BTreeMap, HashMap as StdHashMap},
    net::SocketAddr,
    sync::Arc,
};

use arc_swap::ArcSwap;
use http::{HeaderMap, header};
use scc::HashMap;
use tokio::task::JoinHandle;

use crate::{
    config::{
        HttpGatewayConfig, LoadBalancerConfig, MappingRuleConfig, StaticRouteConfig,
        StickyKeySource,
    },
    core::{
        endpoint::Endpoint,
        load_balancer::{LoadBalancerFactory, LoadBalancingStrategy},
        registry::ServiceRegistry,
    },
    metrics,
    utils::ShutdownToken,
};

const HTTP_SCHEMES: [&str; 2] = ["http", "https"];

/// A path prefix and the backends serving it.
pub struct MappedRoute {
    pub prefix: String,
    /// Base URLs, e.g. `http://10.0.0.4:8181/ctx`
    pub targets: Vec<String>,
    pub balancer: Arc<dyn LoadBalancingStrategy>,
    pub sticky_key: StickyKeySource,
    /// Names of the request policies to run before proxying
    pub policies: Vec<String>,
    pub rewrite: bool,
}

impl std::fmt::Debug for MappedRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedRoute")
            .field("prefix", &self.prefix)
            .field("targets", &self.targets)
            .field("balancer", &self.balancer.name())
            .field("policies", &self.policies)
            .field("rewrite", &self.rewrite)
            .finish()
    }
}

impl MappedRoute {
    /// Key handed to the load balancer for this request
    pub fn client_key(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
        match &self.sticky_key {
            StickyKeySource::ClientAddress => peer.map(|addr| addr.ip().to_string()),
            StickyKeySource::Header { name } => headers
                .get(name.as_str())
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
            StickyKeySource::Cookie { name } => cookie_value(headers, name),
        }
    }
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

/// Immutable routing table in declaration order
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Arc<MappedRoute>>,
}

impl RouteTable {
    pub fn new(routes: Vec<Arc<MappedRoute>>) -> Self {
        Self { routes }
    }

    /// Longest prefix matching `path` or `path` + `/`.
    ///
    /// On equal length the route declared first wins.
    pub fn find(&self, path: &str) -> Option<Arc<MappedRoute>> {
        let with_slash = format!("{path}/");
        let mut best: Option<&Arc<MappedRoute>> = None;
        for route in &self.routes {
            let matches =
                path.starts_with(&route.prefix) || with_slash.starts_with(&route.prefix);
            if matches && best.is_none_or(|current| route.prefix.len() > current.prefix.len()) {
                best = Some(route);
            }
        }
        best.cloned()
    }

    /// `prefix → base URLs`, as served on the index path
    pub fn index(&self) -> BTreeMap<String, Vec<String>> {
        let mut index = BTreeMap::new();
        for route in &self.routes {
            index
                .entry(route.prefix.clone())
                .or_insert_with(Vec::new)
                .extend(route.targets.iter().cloned());
        }
        index
    }

    pub fn routes(&self) -> &[Arc<MappedRoute>] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Builds the routing table from configuration and the live registry.
pub struct RouteMapper {
    registry: Arc<ServiceRegistry>,
    static_routes: Vec<StaticRouteConfig>,
    rules: Vec<MappingRuleConfig>,
    balancers: HashMap<String, Arc<dyn LoadBalancingStrategy>>,
    table: ArcSwap<RouteTable>,
}

impl RouteMapper {
    /// Create a mapper with an empty table; call [`RouteMapper::refresh`] or
    /// [`RouteMapper::spawn_watcher`] to populate it.
    pub fn new(registry: Arc<ServiceRegistry>, config: &HttpGatewayConfig) -> Self {
        Self {
            registry,
            static_routes: config.routes.clone(),
            rules: config.mapping_rules.clone(),
            balancers: HashMap::new(),
            table: ArcSwap::from_pointee(RouteTable::default()),
        }
    }

    /// Current table
    pub fn table(&self) -> Arc<RouteTable> {
        self.table.load_full()
    }

    /// Rebuild the table from configuration plus a registry snapshot and publish it.
    pub async fn refresh(&self) -> Arc<RouteTable> {
        let snapshot = self.registry.snapshot().await;
        let mut routes = Vec::new();

        for route in &self.static_routes {
            routes.push(Arc::new(MappedRoute {
                prefix: route.prefix.clone(),
                targets: route.targets.clone(),
                balancer: self.balancer_for(&route.prefix, &route.load_balancer).await,
                sticky_key: route.load_balancer.sticky_key.clone(),
                policies: route.policies.clone(),
                rewrite: route.rewrite,
            }));
        }

        for rule in &self.rules {
            for (prefix, targets) in apply_rule(rule, &snapshot) {
                routes.push(Arc::new(MappedRoute {
                    balancer: self.balancer_for(&prefix, &rule.load_balancer).await,
                    prefix,
                    targets,
                    sticky_key: rule.load_balancer.sticky_key.clone(),
                    policies: rule.policies.clone(),
                    rewrite: rule.rewrite,
                }));
            }
        }

        let live: Vec<&str> = routes.iter().map(|route| route.prefix.as_str()).collect();
        self.balancers
            .retain_async(|prefix, _| live.contains(&prefix.as_str()))
            .await;

        let table = Arc::new(RouteTable::new(routes));
        self.table.store(table.clone());
        metrics::set_mapped_routes(table.len());
        tracing::debug!(routes = table.len(), "Route table refreshed");
        table
    }

    /// Refresh now and then after every registry change, until shutdown.
    pub fn spawn_watcher(self: Arc<Self>, mut shutdown: ShutdownToken) -> JoinHandle<()> {
        let mut changes = self.registry.subscribe();
        tokio::spawn(async move {
            changes.mark_unchanged();
            self.refresh().await;
            loop {
                tokio::select! {
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        changes.mark_unchanged();
                        self.refresh().await;
                    }
                    _ = shutdown.wait_for_shutdown() => {
                        tracing::debug!("Route mapper stopping");
                        break;
                    }
                }
            }
        })
    }

    /// Reuse the balancer already serving `prefix` so cursors and sticky
    /// assignments survive a refresh.
    async fn balancer_for(
        &self,
        prefix: &str,
        config: &LoadBalancerConfig,
    ) -> Arc<dyn LoadBalancingStrategy> {
        self.balancers
            .entry_async(prefix.to_string())
            .await
            .or_insert_with(|| Arc::from(LoadBalancerFactory::create_strategy(config)))
            .get()
            .clone()
    }
}

/// Expand one mapping rule over a sorted registry snapshot.
///
/// Returns `(prefix, base URLs)` pairs in first-seen order; endpoints that map
/// to the same prefix are merged.
fn apply_rule(
    rule: &MappingRuleConfig,
    snapshot: &[(String, Vec<Endpoint>)],
) -> Vec<(String, Vec<String>)> {
    let mut order: Vec<String> = Vec::new();
    let mut targets: StdHashMap<String, Vec<String>> = StdHashMap::new();

    for (path, endpoints) in snapshot {
        let Some(remainder) = path.strip_prefix(rule.registry_prefix.as_str()) else {
            continue;
        };
        for endpoint in endpoints {
            if !rule.enabled_versions.is_empty()
                && !rule.enabled_versions.contains(&endpoint.version)
            {
                continue;
            }
            let prefix = expand_template(&rule.uri_template, remainder, &endpoint.version);
            let urls: Vec<String> = endpoint
                .urls_with_scheme(&HTTP_SCHEMES)
                .map(str::to_string)
                .collect();
            if urls.is_empty() {
                continue;
            }
            let entry = targets.entry(prefix.clone()).or_insert_with(|| {
                order.push(prefix);
                Vec::new()
            });
            for url in urls {
                if !entry.contains(&url) {
                    entry.push(url);
                }
            }
        }
    }

    order
        .into_iter()
        .filter_map(|prefix| targets.remove(&prefix).map(|urls| (prefix, urls)))
        .collect()
}

/// Substitute `{path}` and `{version}`, collapsing duplicate slashes.
fn expand_template(template: &str, path: &str, version: &str) -> String {
    let expanded = template
        .replace("{path}", path.trim_start_matches('/'))
        .replace("{version}", version);
    let mut prefix = String::with_capacity(expanded.len() + 1);
    if !expanded.starts_with('/') {
        prefix.push('/');
    }
    for c in expanded.chars() {
        if c == '/' && prefix.ends_with('/') {
            continue;
        }
        prefix.push(c);
    }
    prefix
}

/// Path and query to append to the chosen base URL.
///
/// Strips the matched prefix, turns `name.ext/` into `name.ext` for known file
/// extensions and folds `/?query` into `?query`.
pub fn backend_suffix(
    path: &str,
    query: Option<&str>,
    prefix: &str,
    file_extensions: &[String],
) -> String {
    let mut suffix = path.strip_prefix(prefix).unwrap_or_default().to_string();

    if let Some(trimmed) = suffix.strip_suffix('/') {
        if has_known_extension(trimmed, file_extensions) {
            suffix.truncate(trimmed.len());
        }
    }

    if let Some(query) = query.filter(|query| !query.is_empty()) {
        suffix.push('?');
        suffix.push_str(query);
    }
    if let Some(at) = suffix.find("/?") {
        suffix.remove(at);
    }
    suffix
}

fn has_known_extension(path: &str, file_extensions: &[String]) -> bool {
    let segment = path.rsplit('/').next().unwrap_or(path);
    segment.rsplit_once('.').is_some_and(|(_, extension)| {
        file_extensions
            .iter()
            .any(|known| known.eq_ignore_ascii_case(extension))
    })
}

/// Append a suffix produced by [`backend_suffix`] to a base URL.
pub fn join_url(base: &str, suffix: &str) -> String {
    if suffix.is_empty() || suffix.starts_with('?') {
        return format!("{base}{suffix}");
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        suffix.trim_start_matches('/')
    )
}

/// Map a backend-absolute URL back onto the gateway prefix.
///
/// Returns `None` when `value` does not point at `base`.
pub fn rewrite_location(value: &str, base: &str, prefix: &str) -> Option<String> {
    let rest = value.strip_prefix(base.trim_end_matches('/'))?;
    if !(rest.is_empty() || rest.starts_with('/') || rest.starts_with('?')) {
        return None;
    }
    let rewritten = format!("{}{}", prefix.trim_end_matches('/'), rest);
    if rewritten.is_empty() || rewritten.starts_with('?') {
        Some(format!("/{rewritten}"))
    } else {
        Some(rewritten)
    }
}
