use std::{net::SocketAddr, panic::AssertUnwindSafe, sync::Arc, time::Instant};

use axum::{
    body::Body as AxumBody,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header},
};
use futures_util::FutureExt;
use hyper::{Request, Response};
use thiserror::Error;

use crate::{
    config::HttpGatewayConfig,
    core::{
        cdr::{CallDetailLog, CallDetailRecord},
        routing::{RouteMapper, backend_suffix, join_url, rewrite_location},
    },
    metrics,
    ports::{
        http_client::{HttpClient, HttpClientError},
        request_policy::{PolicyDecision, PolicyRegistry},
    },
};

const X_FORWARDED_HOST: &str = "x-forwarded-host";
const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_PREFIX: &str = "x-forwarded-prefix";
const X_FORWARDED_PATH: &str = "x-forwarded-path";

/// Headers that only make sense on a single connection
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Backend response headers that may carry an absolute backend URL
const REWRITTEN_HEADERS: [&str; 3] = ["location", "content-location", "uri"];

/// Why a request was not answered by a backend
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("No route matches '{0}'")]
    NoRoute(String),

    #[error("Denied by request policy: {reason}")]
    Denied { status: StatusCode, reason: String },

    #[error("No endpoint available for route '{0}'")]
    NoEndpoint(String),

    #[error("Invalid backend URL '{url}': {reason}")]
    InvalidBackendUrl { url: String, reason: String },

    #[error(transparent)]
    Backend(#[from] HttpClientError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::NoRoute(_) | GatewayError::NoEndpoint(_) => StatusCode::NOT_FOUND,
            GatewayError::Denied { status, .. } => *status,
            GatewayError::Backend(e) => e.status_code(),
            GatewayError::InvalidBackendUrl { .. } | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// HTTP gateway: serves the route index and proxies everything else.
pub struct HttpGatewayHandler {
    mapper: Arc<RouteMapper>,
    http_client: Arc<dyn HttpClient>,
    policies: PolicyRegistry,
    call_details: Arc<CallDetailLog>,
    index_enabled: bool,
    file_extensions: Vec<String>,
}

impl HttpGatewayHandler {
    pub fn new(
        mapper: Arc<RouteMapper>,
        http_client: Arc<dyn HttpClient>,
        policies: PolicyRegistry,
        call_details: Arc<CallDetailLog>,
        config: &HttpGatewayConfig,
    ) -> Self {
        Self {
            mapper,
            http_client,
            policies,
            call_details,
            index_enabled: config.index_enabled,
            file_extensions: config.file_extensions.clone(),
        }
    }

    pub fn call_details(&self) -> &Arc<CallDetailLog> {
        &self.call_details
    }

    /// Answer one request. Never fails: errors and panics become responses.
    pub async fn handle(&self, req: Request<AxumBody>, peer: Option<SocketAddr>) -> Response<AxumBody> {
        let method = req.method().clone();
        let _timer = metrics::RequestTimer::new(method.as_str());

        if self.index_enabled && is_index_path(req.uri().path()) {
            return self.index_response(&method);
        }

        let started = Instant::now();
        let path = req.uri().path().to_string();
        let outcome = AssertUnwindSafe(self.proxy(req, peer)).catch_unwind().await;

        let (response, prefix, record) = match outcome {
            Ok((prefix, Ok(response))) => {
                (response, prefix, CallDetailRecord::success(started.elapsed()))
            }
            Ok((prefix, Err(e))) => {
                match &e {
                    GatewayError::NoRoute(_) | GatewayError::Denied { .. } => {
                        tracing::debug!(%method, %path, "Request not proxied: {}", e)
                    }
                    _ => tracing::warn!(%method, %path, "Request failed: {}", e),
                }
                let record = CallDetailRecord::failure(started.elapsed(), e.to_string());
                (error_response(e.status_code(), &e.to_string()), prefix, record)
            }
            Err(panic) => {
                let e = GatewayError::Internal(panic_message(panic.as_ref()));
                tracing::error!(%method, %path, "Request handler panicked: {}", e);
                let record = CallDetailRecord::failure(started.elapsed(), e.to_string());
                (error_response(e.status_code(), "Internal error"), None, record)
            }
        };

        self.call_details.record(record);
        metrics::increment_http_request_total(
            prefix.as_deref().unwrap_or("none"),
            method.as_str(),
            response.status().as_u16(),
        );
        response
    }

    fn index_response(&self, method: &Method) -> Response<AxumBody> {
        let body = match serde_json::to_vec(&self.mapper.table().index()) {
            Ok(body) => body,
            Err(e) => {
                let e = GatewayError::Internal(format!("route index: {e}"));
                tracing::error!("Failed to serialize route index: {}", e);
                return error_response(e.status_code(), "Internal error");
            }
        };
        let length = body.len();
        let body = if *method == Method::HEAD {
            AxumBody::empty()
        } else {
            AxumBody::from(body)
        };

        let mut response = Response::new(body);
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
        response
    }

    /// Returns the matched prefix alongside the outcome, for metrics.
    async fn proxy(
        &self,
        req: Request<AxumBody>,
        peer: Option<SocketAddr>,
    ) -> (Option<String>, Result<Response<AxumBody>, GatewayError>) {
        let path = req.uri().path().to_string();
        let Some(route) = self.mapper.table().find(&path) else {
            return (None, Err(GatewayError::NoRoute(path)));
        };
        let prefix = Some(route.prefix.clone());

        let (mut parts, body) = req.into_parts();
        if let PolicyDecision::Deny { status, reason } =
            self.policies.evaluate(&route.policies, &parts, peer).await
        {
            return (prefix, Err(GatewayError::Denied { status, reason }));
        }

        let client_key = route.client_key(&parts.headers, peer);
        let base = match route.balancer.select_target(&route.targets, client_key.as_deref()) {
            Ok(base) => base,
            Err(_) => return (prefix, Err(GatewayError::NoEndpoint(route.prefix.clone()))),
        };

        let suffix = backend_suffix(&path, parts.uri.query(), &route.prefix, &self.file_extensions);
        let url = join_url(&base, &suffix);
        let uri = match url.parse::<Uri>() {
            Ok(uri) => uri,
            Err(e) => {
                return (
                    prefix,
                    Err(GatewayError::InvalidBackendUrl {
                        url,
                        reason: e.to_string(),
                    }),
                );
            }
        };
        let backend = uri
            .authority()
            .map_or_else(|| base.clone(), |authority| authority.to_string());

        strip_hop_by_hop(&mut parts.headers);
        add_forwarded_headers(&mut parts.headers, &route.prefix, &path, peer);
        parts.uri = uri;

        tracing::debug!(prefix = %route.prefix, %backend, %url, "Proxying request");

        let method = parts.method.clone();
        let result = {
            let _timer = metrics::BackendRequestTimer::new(&backend);
            self.http_client
                .send_request(Request::from_parts(parts, body))
                .await
        };

        let response = match result {
            Ok(mut response) => {
                metrics::increment_backend_request_total(
                    &backend,
                    method.as_str(),
                    response.status().as_u16(),
                );
                strip_hop_by_hop(response.headers_mut());
                if route.rewrite {
                    rewrite_backend_urls(response.headers_mut(), &base, &route.prefix);
                }
                Ok(response)
            }
            Err(e) => {
                metrics::increment_backend_request_total(
                    &backend,
                    method.as_str(),
                    e.status_code().as_u16(),
                );
                Err(GatewayError::from(e))
            }
        };
        (prefix, response)
    }
}

fn is_index_path(path: &str) -> bool {
    path.is_empty() || path == "/"
}

fn error_response(status: StatusCode, message: &str) -> Response<AxumBody> {
    let mut response = Response::new(AxumBody::from(message.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panic: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panic: {message}")
    } else {
        "panic".to_string()
    }
}

/// Drop hop-by-hop headers, including any named by `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn add_forwarded_headers(
    headers: &mut HeaderMap,
    prefix: &str,
    path: &str,
    peer: Option<SocketAddr>,
) {
    if !headers.contains_key(X_FORWARDED_HOST) {
        if let Some(host) = headers.get(header::HOST).cloned() {
            headers.insert(X_FORWARDED_HOST, host);
        }
    }
    if !headers.contains_key(X_FORWARDED_FOR) {
        if let Some(peer) = peer {
            if let Ok(value) = HeaderValue::from_str(&peer.ip().to_string()) {
                headers.insert(X_FORWARDED_FOR, value);
            }
        }
    }
    if let Ok(value) = HeaderValue::from_str(prefix.trim_end_matches('/')) {
        headers.insert(X_FORWARDED_PREFIX, value);
    }
    if let Ok(value) = HeaderValue::from_str(path) {
        headers.insert(X_FORWARDED_PATH, value);
    }
}

fn rewrite_backend_urls(headers: &mut HeaderMap, base: &str, prefix: &str) {
    for name in REWRITTEN_HEADERS {
        let Some(rewritten) = headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| rewrite_location(value, base, prefix))
        else {
            continue;
        };
        if let Ok(value) = HeaderValue::from_str(&rewritten) {
            headers.insert(name, value);
        }
    }
}
