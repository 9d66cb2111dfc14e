// Integration tests for the protocol detecting TCP gateway
mod common;

#[cfg(test)]
mod tests {
    use std::{
        io::Write,
        sync::Arc,
        time::{Duration, Instant},
    };

    use fleet_gateway::{
        ConnectionTracker, DetectingGateway, ServiceRegistry,
        adapters::tls,
        config::{DetectingListenerConfig, ProtocolKind, TimeoutConfig, TlsConfig},
        core::Endpoint,
        utils::ServiceHandle,
    };
    use tempfile::NamedTempFile;
    use tokio::{io::AsyncWriteExt, net::TcpStream};
    use tokio_rustls::TlsAcceptor;

    use crate::common::{
        echo_roundtrip, eventually, mqtt_connect, read_until_closed, spawn_echo_backend,
        spawn_hangup_backend, stomp_connect,
    };

    const PROTOCOLS: [ProtocolKind; 5] = [
        ProtocolKind::Stomp,
        ProtocolKind::Mqtt,
        ProtocolKind::Amqp,
        ProtocolKind::OpenWire,
        ProtocolKind::Http,
    ];

    struct Harness {
        handle: ServiceHandle,
        tracker: Arc<ConnectionTracker>,
        registry: Arc<ServiceRegistry>,
    }

    impl Harness {
        async fn start(
            protocols: &[ProtocolKind],
            detection_timeout_ms: u64,
            tls: Option<TlsAcceptor>,
        ) -> Self {
            let mut listener =
                DetectingListenerConfig::new("test", "127.0.0.1:0", protocols.to_vec());
            listener.virtual_host_prefix = "/vhosts/".to_string();
            listener.default_virtual_host = "fallback".to_string();

            let timeouts = TimeoutConfig {
                detection_timeout_ms,
                connect_timeout_ms: 1000,
                response_timeout_ms: 1000,
            };
            let registry = Arc::new(ServiceRegistry::new());
            let tracker = Arc::new(ConnectionTracker::new());
            let gateway = Arc::new(DetectingGateway::new(
                &listener,
                &timeouts,
                registry.clone(),
                tracker.clone(),
                tls,
            ));
            let handle = gateway.start(&listener.listen_addr).await.unwrap();
            Self {
                handle,
                tracker,
                registry,
            }
        }

        async fn register(&self, vhost: &str, url: String) {
            self.registry
                .service_updated(
                    &format!("/vhosts/{vhost}"),
                    Endpoint::new("broker", vhost, "1.0", vec![url]),
                )
                .await;
        }

        async fn connect(&self) -> TcpStream {
            TcpStream::connect(self.handle.local_addr()).await.unwrap()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unknown_protocol_is_rejected_fast() {
        let harness = Harness::start(&PROTOCOLS, 5000, None).await;

        let started = Instant::now();
        let mut client = harness.connect().await;
        client.write_all(b"GARBAGE\r\n\r\n").await.unwrap();
        let (received, closed_at) = read_until_closed(&mut client).await;

        assert!(received.is_empty());
        assert!(closed_at - started < Duration::from_secs(1));
        assert!(
            eventually(Duration::from_secs(1), || harness.tracker.stats().failed == 1).await
        );
        let stats = harness.tracker.stats();
        assert_eq!(stats.received, 1);
        assert_eq!(stats.successful, 0);

        harness.handle.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_silent_connection_times_out_at_deadline() {
        let harness = Harness::start(&PROTOCOLS, 300, None).await;

        let started = Instant::now();
        let mut client = harness.connect().await;
        let (received, closed_at) = read_until_closed(&mut client).await;
        let elapsed = closed_at - started;

        assert!(received.is_empty());
        assert!(elapsed >= Duration::from_millis(300), "closed early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1000), "closed late: {elapsed:?}");
        assert!(
            eventually(Duration::from_secs(1), || harness.tracker.stats().failed == 1).await
        );
        assert_eq!(harness.tracker.stats().successful, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_partial_frame_times_out() {
        let harness = Harness::start(&PROTOCOLS, 300, None).await;

        let mut client = harness.connect().await;
        client.write_all(b"CONN").await.unwrap();
        let started = Instant::now();
        let (_, closed_at) = read_until_closed(&mut client).await;

        assert!(closed_at - started < Duration::from_millis(1000));
        assert!(
            eventually(Duration::from_secs(1), || harness.tracker.stats().failed == 1).await
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stomp_is_spliced_by_host_header() {
        let harness = Harness::start(&PROTOCOLS, 5000, None).await;
        let backend = spawn_echo_backend().await;
        harness
            .register("broker-a", format!("stomp://{backend}"))
            .await;

        let mut client = harness.connect().await;
        let frame = stomp_connect("broker-a");
        assert_eq!(echo_roundtrip(&mut client, &frame).await, frame);
        assert_eq!(echo_roundtrip(&mut client, b"SEND\n\nhi\0").await, b"SEND\n\nhi\0");

        let stats = harness.tracker.stats();
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.connected, 1);
        assert_eq!(harness.tracker.connected_ids().await.len(), 1);

        drop(client);
        assert!(
            eventually(Duration::from_secs(2), || harness.tracker.stats().connected == 0).await
        );
        assert_eq!(harness.tracker.stats().failed, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_backend_hangup_closes_idle_client() {
        let harness = Harness::start(&PROTOCOLS, 5000, None).await;
        let backend = spawn_hangup_backend().await;
        harness
            .register("broker-a", format!("stomp://{backend}"))
            .await;

        let mut client = harness.connect().await;
        client.write_all(&stomp_connect("broker-a")).await.unwrap();

        // The client stays open and silent after the backend hangs up
        assert!(
            eventually(Duration::from_secs(2), || {
                let stats = harness.tracker.stats();
                stats.successful == 1 && stats.connected == 0
            })
            .await
        );
        assert!(harness.tracker.connected_ids().await.is_empty());

        let (received, _) = tokio::time::timeout(
            Duration::from_secs(2),
            read_until_closed(&mut client),
        )
        .await
        .expect("client side left open");
        assert!(received.is_empty());
        assert!(harness.tracker.wait_for_drain(Duration::from_millis(500)).await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_mqtt_virtual_host_from_username() {
        let harness = Harness::start(&PROTOCOLS, 5000, None).await;
        let backend = spawn_echo_backend().await;
        harness
            .register("tenant", format!("mqtt://{backend}"))
            .await;

        let mut client = harness.connect().await;
        let packet = mqtt_connect("c1", "tenant/device-7");
        assert_eq!(echo_roundtrip(&mut client, &packet).await, packet);
        assert_eq!(harness.tracker.stats().successful, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_amqp_uses_default_virtual_host() {
        let harness = Harness::start(&PROTOCOLS, 5000, None).await;
        let backend = spawn_echo_backend().await;
        harness
            .register("fallback", format!("amqp://{backend}"))
            .await;

        let mut client = harness.connect().await;
        let header = b"AMQP\x00\x00\x09\x01";
        assert_eq!(echo_roundtrip(&mut client, header).await, header);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_backend_scheme_must_fit_protocol() {
        let harness = Harness::start(&PROTOCOLS, 5000, None).await;
        let backend = spawn_echo_backend().await;
        // Only an HTTP endpoint is registered; a STOMP client must not reach it
        harness
            .register("broker-a", format!("http://{backend}"))
            .await;

        let mut client = harness.connect().await;
        client.write_all(&stomp_connect("broker-a")).await.unwrap();
        let (received, _) = read_until_closed(&mut client).await;

        assert!(received.is_empty());
        assert!(
            eventually(Duration::from_secs(1), || harness.tracker.stats().failed == 1).await
        );
        assert_eq!(harness.tracker.stats().successful, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unknown_virtual_host_counts_as_failed() {
        let harness = Harness::start(&PROTOCOLS, 5000, None).await;

        let mut client = harness.connect().await;
        client.write_all(&stomp_connect("nobody")).await.unwrap();
        let (received, _) = read_until_closed(&mut client).await;

        assert!(received.is_empty());
        assert!(
            eventually(Duration::from_secs(1), || harness.tracker.stats().failed == 1).await
        );
    }

    fn tls_material() -> (rcgen::CertifiedKey<rcgen::KeyPair>, NamedTempFile, NamedTempFile) {
        let certified =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let mut cert = NamedTempFile::new().unwrap();
        cert.write_all(certified.cert.pem().as_bytes()).unwrap();
        let mut key = NamedTempFile::new().unwrap();
        key.write_all(certified.signing_key.serialize_pem().as_bytes())
            .unwrap();
        (certified, cert, key)
    }

    fn acceptor(cert: &NamedTempFile, key: &NamedTempFile) -> TlsAcceptor {
        tls::acceptor(&TlsConfig {
            cert_path: cert.path().display().to_string(),
            key_path: key.path().display().to_string(),
        })
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_tls_is_terminated_and_redetected() {
        let (certified, cert, key) = tls_material();
        let mut protocols = vec![ProtocolKind::Tls];
        protocols.extend(PROTOCOLS);
        let harness = Harness::start(&protocols, 5000, Some(acceptor(&cert, &key))).await;
        let backend = spawn_echo_backend().await;
        harness
            .register("secure", format!("stomp://{backend}"))
            .await;

        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        let mut roots = rustls::RootCertStore::empty();
        roots.add(certified.cert.der().clone()).unwrap();
        let client_config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = tokio_rustls::TlsConnector::from(Arc::new(client_config));
        let server_name = rustls::pki_types::ServerName::try_from("localhost").unwrap();

        let tcp = harness.connect().await;
        let mut stream = connector.connect(server_name, tcp).await.unwrap();
        let frame = stomp_connect("secure");
        assert_eq!(echo_roundtrip(&mut stream, &frame).await, frame);
        assert_eq!(harness.tracker.stats().successful, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_tls_handshake_failure_is_rejected() {
        let (_certified, cert, key) = tls_material();
        let harness = Harness::start(
            &[ProtocolKind::Tls, ProtocolKind::Stomp],
            2000,
            Some(acceptor(&cert, &key)),
        )
        .await;

        let started = Instant::now();
        let mut client = harness.connect().await;
        // A handshake record announcing a ClientHello with an empty body
        client
            .write_all(&[0x16, 0x03, 0x01, 0x00, 0x04, 0x01, 0x00, 0x00, 0x00])
            .await
            .unwrap();
        let (_, closed_at) = read_until_closed(&mut client).await;

        assert!(closed_at - started < Duration::from_millis(2000));
        assert!(
            eventually(Duration::from_secs(1), || harness.tracker.stats().failed == 1).await
        );
        assert_eq!(harness.tracker.stats().successful, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_tls_without_certificate_is_rejected() {
        let harness = Harness::start(&[ProtocolKind::Tls, ProtocolKind::Stomp], 2000, None).await;

        let mut client = harness.connect().await;
        client
            .write_all(&[0x16, 0x03, 0x01, 0x00, 0x04, 0x01, 0x00, 0x00, 0x00])
            .await
            .unwrap();
        let (received, _) = read_until_closed(&mut client).await;

        assert!(received.is_empty());
        assert!(
            eventually(Duration::from_secs(1), || harness.tracker.stats().failed == 1).await
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_many_concurrent_rejections_are_all_counted() {
        let harness = Harness::start(&PROTOCOLS, 5000, None).await;

        let mut clients = Vec::new();
        for _ in 0..20 {
            let addr = harness.handle.local_addr();
            clients.push(tokio::spawn(async move {
                let mut client = TcpStream::connect(addr).await.unwrap();
                client.write_all(b"\xff\xff\xff\xff\xff\xff\xff\xff").await.unwrap();
                read_until_closed(&mut client).await
            }));
        }
        for client in clients {
            client.await.unwrap();
        }

        assert!(
            eventually(Duration::from_secs(2), || harness.tracker.stats().failed == 20).await
        );
        let stats = harness.tracker.stats();
        assert_eq!(stats.received, 20);
        assert_eq!(stats.connecting, 0);
    }
}
