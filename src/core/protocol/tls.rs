use super::{Detection, ProtocolKind, ProtocolMatcher, match_pattern};

/// Handshake record, TLS major version 3, two length bytes, ClientHello.
const CLIENT_HELLO: [Option<u8>; 6] = [Some(0x16), Some(0x03), None, None, None, Some(0x01)];

/// Matches a TLS record carrying a ClientHello.
///
/// A match hands the connection to the TLS acceptor; detection then restarts on
/// the decrypted stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct TlsMatcher;

impl ProtocolMatcher for TlsMatcher {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Tls
    }

    fn classify(&self, buffer: &[u8]) -> Detection {
        match_pattern(buffer, &CLIENT_HELLO)
    }

    fn schemes(&self) -> &'static [&'static str] {
        &[]
    }
}
