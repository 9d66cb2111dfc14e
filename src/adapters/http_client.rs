use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::Result;
use hyper::{Request, Response, Version, header, header::HeaderValue};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tokio::time::timeout;

use crate::{
    config::TimeoutConfig,
    ports::http_client::{HttpClient, HttpClientError, HttpClientResult},
};

const USER_AGENT: &str = concat!("fleet-gateway/", env!("CARGO_PKG_VERSION"));

/// Backend HTTP client built on Hyper with Rustls.
///
/// * Connect attempts are bounded by the configured connect timeout
/// * Waiting for the response head is bounded by the response timeout
/// * Bodies stream in both directions and are never buffered
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
    response_timeout: Duration,
}

impl HttpClientAdapter {
    /// Create a client honouring the connect and response timeouts.
    pub fn new(timeouts: &TimeoutConfig) -> Result<Self> {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);
        http_connector.set_connect_timeout(Some(Duration::from_millis(
            timeouts.connect_timeout_ms,
        )));
        http_connector.set_nodelay(true);

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();
        for cert in native_certs.certs {
            if root_cert_store.add(cert).is_err() {
                tracing::warn!("Failed to add native certificate to rustls RootCertStore");
            }
        }
        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }
        tracing::debug!("Loaded {} native root certificates", root_cert_store.len());

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, AxumBody>(https_connector);

        Ok(Self {
            client,
            response_timeout: Duration::from_millis(timeouts.response_timeout_ms),
        })
    }

    fn add_common_headers(req: &mut Request<AxumBody>) {
        let headers = req.headers_mut();
        if !headers.contains_key(header::USER_AGENT) {
            headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
        }
    }

    /// Point `Host` at the backend authority.
    fn set_host(req: &mut Request<AxumBody>) -> HttpClientResult<()> {
        let Some(host) = req.uri().host() else {
            return Err(HttpClientError::InvalidRequest(format!(
                "Outgoing URI has no host: {}",
                req.uri()
            )));
        };
        let value = match req.uri().port_u16() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let value = HeaderValue::from_str(&value)
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;
        req.headers_mut().insert(header::HOST, value);
        Ok(())
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(
        &self,
        mut req: Request<AxumBody>,
    ) -> HttpClientResult<Response<AxumBody>> {
        Self::add_common_headers(&mut req);
        Self::set_host(&mut req)?;

        let backend = format!(
            "{}://{}",
            req.uri().scheme_str().unwrap_or("http"),
            req.uri()
                .authority()
                .map_or_else(|| "unknown".to_string(), |a| a.to_string())
        );
        let method = req.method().clone();
        let uri = req.uri().clone();
        *req.version_mut() = Version::HTTP_11;

        tracing::debug!(%backend, %method, %uri, "Sending backend request");

        match timeout(self.response_timeout, self.client.request(req)).await {
            Ok(Ok(response)) => {
                let (mut parts, body) = response.into_parts();
                // Axum re-frames the streamed body
                parts.headers.remove(header::TRANSFER_ENCODING);
                Ok(Response::from_parts(parts, AxumBody::new(body)))
            }
            Ok(Err(e)) if e.is_connect() => {
                tracing::warn!(%backend, %method, %uri, "Backend connect failed: {}", e);
                Err(HttpClientError::ConnectionError(format!(
                    "Connecting to {backend} failed: {e}"
                )))
            }
            Ok(Err(e)) => {
                tracing::warn!(%backend, %method, %uri, "Backend request failed: {}", e);
                Err(HttpClientError::BackendError {
                    url: uri.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                let millis = self.response_timeout.as_millis() as u64;
                tracing::warn!(%backend, %method, %uri, timeout_ms = millis, "Backend response timed out");
                Err(HttpClientError::Timeout(millis))
            }
        }
    }
}
