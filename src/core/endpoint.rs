use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::config::StaticServiceConfig;

/// Errors related to endpoint URLs
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EndpointError {
    /// Error when URL is invalid
    #[error("Invalid endpoint URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Result type for endpoint operations
pub type EndpointResult<T> = Result<T, EndpointError>;

/// One service instance as advertised by one container.
///
/// Endpoints are immutable records; an update replaces the whole value
/// registered under its `(service_id, container_id)` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub service_id: String,
    pub container_id: String,
    pub version: String,
    /// Scheme qualified URLs, e.g. `http://10.0.0.4:8181/ctx` or `stomp://10.0.0.4:61613`
    pub urls: Vec<String>,
}

impl Endpoint {
    pub fn new(
        service_id: impl Into<String>,
        container_id: impl Into<String>,
        version: impl Into<String>,
        urls: Vec<String>,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            container_id: container_id.into(),
            version: version.into(),
            urls,
        }
    }

    /// An endpoint without URLs signals a withdrawal rather than an addition.
    pub fn is_withdrawal(&self) -> bool {
        self.urls.is_empty()
    }

    /// URLs whose scheme is one of `schemes`, in advertised order.
    pub fn urls_with_scheme<'a>(&'a self, schemes: &'a [&str]) -> impl Iterator<Item = &'a str> {
        self.urls.iter().map(String::as_str).filter(move |url| {
            scheme_of(url).is_some_and(|scheme| {
                schemes
                    .iter()
                    .any(|wanted| wanted.eq_ignore_ascii_case(scheme))
            })
        })
    }

    /// `host:port` socket addresses for the URLs matching `schemes`.
    ///
    /// URLs that cannot be turned into an address are skipped with a warning.
    pub fn socket_addresses(&self, schemes: &[&str]) -> Vec<String> {
        self.urls_with_scheme(schemes)
            .filter_map(|url| match socket_address(url) {
                Ok(address) => Some(address),
                Err(e) => {
                    tracing::warn!(
                        service = %self.service_id,
                        container = %self.container_id,
                        "Skipping endpoint URL: {}",
                        e
                    );
                    None
                }
            })
            .collect()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} ({}) {:?}",
            self.service_id, self.container_id, self.version, self.urls
        )
    }
}

impl From<&StaticServiceConfig> for Endpoint {
    fn from(config: &StaticServiceConfig) -> Self {
        Endpoint::new(
            config.service_id.clone(),
            config.container_id.clone(),
            config.version.clone(),
            config.urls.clone(),
        )
    }
}

/// Scheme of a URL string without fully parsing it.
pub fn scheme_of(url: &str) -> Option<&str> {
    url.split_once("://").map(|(scheme, _)| scheme)
}

/// Resolve a scheme qualified URL into a `host:port` string suitable for `TcpStream::connect`.
pub fn socket_address(url: &str) -> EndpointResult<String> {
    let parsed = Url::parse(url).map_err(|e| EndpointError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    let host = parsed.host_str().ok_or_else(|| EndpointError::InvalidUrl {
        url: url.to_string(),
        reason: "missing host".to_string(),
    })?;

    let port = parsed
        .port_or_known_default()
        .ok_or_else(|| EndpointError::InvalidUrl {
            url: url.to_string(),
            reason: "missing port".to_string(),
        })?;

    Ok(format!("{host}:{port}"))
}
