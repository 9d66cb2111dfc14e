//! Protocol-detecting TCP listener.
//!
//! Each accepted socket is read until one of the configured matchers claims
//! it, all of them reject it, or the detection deadline passes. TLS is
//! terminated in place and detection restarts on the decrypted stream. Every
//! other protocol is routed by virtual host to a registered backend and
//! spliced byte for byte, starting with the bytes read during detection.
use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use bytes::Bytes;
use eyre::{Result, WrapErr};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, copy},
    net::{TcpListener, TcpStream},
    sync::oneshot,
    time::{timeout, timeout_at},
};
use tokio_rustls::TlsAcceptor;
use tracing::Instrument;

use crate::{
    config::{DetectingListenerConfig, TimeoutConfig},
    core::{
        detection::{ConnectionPhase, ConnectionState, DetectionOutcome, DetectionState},
        load_balancer::{LoadBalancerFactory, LoadBalancingStrategy},
        protocol::{MatcherSet, ProtocolKind, ProtocolMatcher},
        registry::ServiceRegistry,
    },
    metrics,
    tracing_setup::{connection_span, listener_span},
    utils::{ConnectionTracker, PrefixedStream, ServiceHandle},
};

const READ_CHUNK: usize = 2048;

/// Why a connection ended before it was proxied
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConnectionError {
    #[error("No protocol matched the first {0} bytes")]
    Rejected(usize),

    #[error("Protocol detection timed out")]
    TimedOut,

    #[error("Peer closed the connection during detection")]
    PeerClosed,

    #[error("TLS connection but no certificate is configured")]
    TlsNotConfigured,

    #[error("TLS handshake failed: {0}")]
    Handshake(String),

    #[error("No backend registered under '{0}'")]
    NoBackend(String),

    #[error("Connecting to backend {addr} failed: {reason}")]
    BackendUnreachable { addr: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ConnectionError {
    /// Label used on the failed connections counter
    pub fn reason(&self) -> &'static str {
        match self {
            ConnectionError::TimedOut => "timed_out",
            ConnectionError::TlsNotConfigured | ConnectionError::Handshake(_) => "tls",
            ConnectionError::NoBackend(_) => "no_backend",
            ConnectionError::BackendUnreachable { .. } => "backend_unreachable",
            ConnectionError::Rejected(_) | ConnectionError::PeerClosed | ConnectionError::Io(_) => {
                "rejected"
            }
        }
    }

    fn phase(&self) -> ConnectionPhase {
        match self {
            ConnectionError::TimedOut => ConnectionPhase::TimedOut,
            _ => ConnectionPhase::Rejected,
        }
    }
}

/// Per-listener settings
#[derive(Debug, Clone)]
pub struct DetectingGatewaySettings {
    pub name: String,
    pub default_virtual_host: String,
    pub virtual_host_prefix: String,
    pub max_detection_bytes: usize,
    pub detection_timeout: Duration,
    pub connect_timeout: Duration,
}

impl DetectingGatewaySettings {
    pub fn new(listener: &DetectingListenerConfig, timeouts: &TimeoutConfig) -> Self {
        Self {
            name: listener.name.clone(),
            default_virtual_host: listener.default_virtual_host.clone(),
            virtual_host_prefix: listener.virtual_host_prefix.clone(),
            max_detection_bytes: listener.max_detection_bytes,
            detection_timeout: Duration::from_millis(timeouts.detection_timeout_ms),
            connect_timeout: Duration::from_millis(timeouts.connect_timeout_ms),
        }
    }
}

/// A listener detecting the protocol of each connection and splicing it to a backend.
pub struct DetectingGateway {
    settings: DetectingGatewaySettings,
    matchers: MatcherSet,
    /// Offered on the decrypted stream of a TLS connection
    inner_matchers: MatcherSet,
    registry: Arc<ServiceRegistry>,
    balancer: Arc<dyn LoadBalancingStrategy>,
    tracker: Arc<ConnectionTracker>,
    tls: Option<TlsAcceptor>,
}

impl DetectingGateway {
    pub fn new(
        listener: &DetectingListenerConfig,
        timeouts: &TimeoutConfig,
        registry: Arc<ServiceRegistry>,
        tracker: Arc<ConnectionTracker>,
        tls: Option<TlsAcceptor>,
    ) -> Self {
        let matchers = MatcherSet::new(&listener.protocols);
        Self {
            settings: DetectingGatewaySettings::new(listener, timeouts),
            inner_matchers: matchers.without(ProtocolKind::Tls),
            matchers,
            registry,
            balancer: Arc::from(LoadBalancerFactory::create_strategy(&listener.load_balancer)),
            tracker,
            tls,
        }
    }

    pub fn tracker(&self) -> &Arc<ConnectionTracker> {
        &self.tracker
    }

    pub fn settings(&self) -> &DetectingGatewaySettings {
        &self.settings
    }

    /// Bind `addr` and serve until the returned handle is stopped.
    pub async fn start(self: Arc<Self>, addr: &str) -> Result<ServiceHandle> {
        let listener = TcpListener::bind(addr)
            .await
            .wrap_err_with(|| format!("Failed to bind detecting listener to {addr}"))?;
        let local_addr = listener
            .local_addr()
            .wrap_err("Failed to read listener address")?;

        let protocols = self
            .matchers
            .matchers()
            .iter()
            .map(|m| m.kind().as_str())
            .collect::<Vec<_>>()
            .join(",");
        tracing::info!(
            listener = %self.settings.name,
            %local_addr,
            %protocols,
            "Detecting listener started"
        );

        let span = listener_span(&self.settings.name, &protocols);
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(self.accept_loop(listener, stop_rx).instrument(span));
        Ok(ServiceHandle::new(local_addr, stop_tx, task))
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener, mut stop_rx: oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                _ = &mut stop_rx => {
                    tracing::info!(listener = %self.settings.name, "Detecting listener stopped");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        let gateway = self.clone();
                        let span = connection_span(&self.settings.name, &peer.to_string());
                        tokio::spawn(
                            async move {
                                gateway.handle_connection(socket, peer).await;
                            }
                            .instrument(span),
                        );
                    }
                    Err(e) => {
                        tracing::warn!(listener = %self.settings.name, "Accept error: {}", e);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                }
            }
        }
    }

    /// Drive one connection to completion. Never fails; outcomes are counted.
    pub async fn handle_connection(&self, socket: TcpStream, peer: SocketAddr) {
        let info = self.tracker.accept(peer).await;
        let mut state = ConnectionState::accepted(info.id, self.settings.detection_timeout);
        state.transition(ConnectionPhase::Detecting);

        if let Err(e) = self.serve(socket, &mut state).await {
            state.transition(e.phase());
            metrics::record_detection_duration(e.reason(), state.started_at.elapsed());
            self.tracker.mark_failed(info.id, e.reason()).await;
            tracing::debug!(
                listener = %self.settings.name,
                connection = info.id,
                %peer,
                phase = %state.phase(),
                "Connection not proxied: {}",
                e
            );
        }

        state.transition(ConnectionPhase::Closed);
        self.tracker.close(info.id).await;
    }

    async fn serve(
        &self,
        mut socket: TcpStream,
        state: &mut ConnectionState,
    ) -> Result<(), ConnectionError> {
        let _ = socket.set_nodelay(true);
        let (matcher, buffered) = self.detect(&mut socket, &self.matchers, state).await?;
        state.transition(ConnectionPhase::Matched);

        if matcher.kind() != ProtocolKind::Tls {
            return self.proxy(socket, matcher.as_ref(), buffered, state).await;
        }

        let acceptor = self.tls.as_ref().ok_or(ConnectionError::TlsNotConfigured)?;
        let replay = PrefixedStream::new(buffered, socket);
        let mut tls_stream = timeout_at(state.deadline(), acceptor.accept(replay))
            .await
            .map_err(|_| ConnectionError::TimedOut)?
            .map_err(|e| ConnectionError::Handshake(e.to_string()))?;

        state.transition(ConnectionPhase::Detecting);
        let (matcher, buffered) = self
            .detect(&mut tls_stream, &self.inner_matchers, state)
            .await?;
        state.transition(ConnectionPhase::Matched);
        self.proxy(tls_stream, matcher.as_ref(), buffered, state)
            .await
    }

    /// Read until the matcher set decides, bounded by the connection deadline.
    async fn detect<S>(
        &self,
        stream: &mut S,
        matchers: &MatcherSet,
        state: &ConnectionState,
    ) -> Result<(Arc<dyn ProtocolMatcher>, Bytes), ConnectionError>
    where
        S: AsyncRead + Unpin,
    {
        let mut detection = DetectionState::new(matchers, self.settings.max_detection_bytes);
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            let read = timeout_at(state.deadline(), stream.read(&mut chunk))
                .await
                .map_err(|_| ConnectionError::TimedOut)??;
            if read == 0 {
                return Err(ConnectionError::PeerClosed);
            }

            detection.offer(&chunk[..read]);
            match detection.evaluate() {
                DetectionOutcome::Matched(matcher) => {
                    metrics::record_detection_duration("matched", state.started_at.elapsed());
                    tracing::debug!(
                        connection = state.id,
                        protocol = %matcher.kind(),
                        bytes = detection.buffered().len(),
                        "Protocol detected"
                    );
                    return Ok((matcher, detection.into_bytes()));
                }
                DetectionOutcome::Rejected => {
                    return Err(ConnectionError::Rejected(detection.buffered().len()));
                }
                DetectionOutcome::Pending => {}
            }
        }
    }

    /// Pick a backend for the detected virtual host and splice the connection to it.
    async fn proxy<S>(
        &self,
        client: S,
        matcher: &dyn ProtocolMatcher,
        buffered: Bytes,
        state: &mut ConnectionState,
    ) -> Result<(), ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let virtual_host = matcher
            .virtual_host(&buffered)
            .unwrap_or_else(|| self.settings.default_virtual_host.clone());
        let path = format!("{}{}", self.settings.virtual_host_prefix, virtual_host);

        let mut candidates: Vec<String> = self
            .registry
            .query(&path)
            .await
            .iter()
            .flat_map(|endpoint| endpoint.socket_addresses(matcher.schemes()))
            .collect();
        candidates.sort();
        candidates.dedup();

        let target = self
            .balancer
            .select_target(&candidates, Some(&virtual_host))
            .map_err(|_| ConnectionError::NoBackend(path.clone()))?;

        let mut backend = timeout(self.settings.connect_timeout, TcpStream::connect(&target))
            .await
            .map_err(|_| ConnectionError::BackendUnreachable {
                addr: target.clone(),
                reason: "connect timeout".to_string(),
            })?
            .map_err(|e| ConnectionError::BackendUnreachable {
                addr: target.clone(),
                reason: e.to_string(),
            })?;
        let _ = backend.set_nodelay(true);
        backend.write_all(&buffered).await?;

        state.transition(ConnectionPhase::Proxying);
        self.tracker.mark_proxying(state.id, matcher.kind()).await;
        let span = tracing::Span::current();
        span.record("protocol", matcher.kind().as_str());
        span.record("backend", target.as_str());
        tracing::debug!(
            connection = state.id,
            protocol = %matcher.kind(),
            %virtual_host,
            backend = %target,
            "Proxying connection"
        );

        splice(client, backend, state.id).await;
        Ok(())
    }
}

/// Copy both directions until either one ends, then drop both sockets.
async fn splice<S>(client: S, backend: TcpStream, id: u64)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut backend_read, mut backend_write) = backend.into_split();

    let (direction, copied) = tokio::select! {
        copied = copy(&mut client_read, &mut backend_write) => ("client", copied),
        copied = copy(&mut backend_read, &mut client_write) => ("backend", copied),
    };
    match copied {
        Ok(bytes) => tracing::debug!(
            connection = id,
            closed_by = direction,
            bytes,
            "Connection finished"
        ),
        Err(e) => tracing::debug!(
            connection = id,
            closed_by = direction,
            "Connection ended: {}",
            e
        ),
    }
}
