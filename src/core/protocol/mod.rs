//! Protocol matchers for the detecting gateway.
//!
//! Each matcher is a stateless classifier looking at the bytes a connection
//! has sent so far:
//! - STOMP (`CONNECT` / `STOMP` frames)
//! - MQTT (CONNECT packets, 3.1 / 3.1.1 / 5)
//! - AMQP (protocol header)
//! - OpenWire (`WireFormatInfo` command)
//! - HTTP/1.x (request line and headers)
//! - TLS (handshake record carrying a ClientHello)
//!
//! Matchers are shared between all connections of a listener and are
//! evaluated in the configured priority order.

pub mod amqp;
pub mod http;
pub mod mqtt;
pub mod openwire;
pub mod stomp;
pub mod tls;

use std::{fmt, sync::Arc};

pub use amqp::AmqpMatcher;
pub use http::HttpMatcher;
pub use mqtt::MqttMatcher;
pub use openwire::OpenWireMatcher;
pub use stomp::StompMatcher;
pub use tls::TlsMatcher;

pub use crate::config::ProtocolKind;

/// Result of classifying a byte prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    /// The bytes are this protocol and carry enough framing to route the connection
    Match,
    /// The bytes can never become this protocol
    Reject,
    /// Not decided yet
    NeedMore,
}

/// Stateless protocol classifier
pub trait ProtocolMatcher: Send + Sync + 'static {
    /// Which protocol this matcher recognises
    fn kind(&self) -> ProtocolKind;

    /// Classify the bytes received so far
    ///
    /// # Arguments
    /// * `buffer` - Every byte the peer has sent since the connection (or the
    ///   decrypted stream) started
    fn classify(&self, buffer: &[u8]) -> Detection;

    /// Virtual host declared by the peer, if the protocol can carry one.
    ///
    /// Only called on a buffer this matcher classified as [`Detection::Match`].
    fn virtual_host(&self, _buffer: &[u8]) -> Option<String> {
        None
    }

    /// URL schemes of endpoints able to serve this protocol
    fn schemes(&self) -> &'static [&'static str];
}

impl fmt::Debug for dyn ProtocolMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProtocolMatcher({})", self.kind())
    }
}

/// Matcher for a configured protocol kind
pub fn matcher_for(kind: ProtocolKind) -> Arc<dyn ProtocolMatcher> {
    match kind {
        ProtocolKind::Stomp => Arc::new(StompMatcher),
        ProtocolKind::Mqtt => Arc::new(MqttMatcher),
        ProtocolKind::Amqp => Arc::new(AmqpMatcher),
        ProtocolKind::OpenWire => Arc::new(OpenWireMatcher),
        ProtocolKind::Http => Arc::new(HttpMatcher),
        ProtocolKind::Tls => Arc::new(TlsMatcher),
    }
}

/// Ordered set of matchers evaluated for every connection of a listener
#[derive(Clone, Debug)]
pub struct MatcherSet {
    matchers: Vec<Arc<dyn ProtocolMatcher>>,
}

impl MatcherSet {
    /// Build the set in the given priority order
    pub fn new(kinds: &[ProtocolKind]) -> Self {
        Self {
            matchers: kinds.iter().copied().map(matcher_for).collect(),
        }
    }

    /// The same set with `kind` left out, keeping priority order
    pub fn without(&self, kind: ProtocolKind) -> Self {
        Self {
            matchers: self
                .matchers
                .iter()
                .filter(|matcher| matcher.kind() != kind)
                .cloned()
                .collect(),
        }
    }

    pub fn contains(&self, kind: ProtocolKind) -> bool {
        self.matchers.iter().any(|matcher| matcher.kind() == kind)
    }

    pub fn matchers(&self) -> &[Arc<dyn ProtocolMatcher>] {
        &self.matchers
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }
}

/// Compare `buffer` against a byte pattern where `None` matches any byte.
///
/// Rejects on the first mismatch, matches once the whole pattern was seen.
pub(crate) fn match_pattern(buffer: &[u8], pattern: &[Option<u8>]) -> Detection {
    for (byte, expected) in buffer.iter().zip(pattern) {
        if let Some(expected) = expected {
            if byte != expected {
                return Detection::Reject;
            }
        }
    }
    if buffer.len() >= pattern.len() {
        Detection::Match
    } else {
        Detection::NeedMore
    }
}

/// Compare `buffer` against a literal prefix.
pub(crate) fn match_literal(buffer: &[u8], literal: &[u8]) -> Detection {
    let seen = buffer.len().min(literal.len());
    if buffer[..seen] != literal[..seen] {
        Detection::Reject
    } else if seen == literal.len() {
        Detection::Match
    } else {
        Detection::NeedMore
    }
}

/// Index just past the end of a text header block (`\r\n\r\n` or `\n\n`), if complete.
pub(crate) fn header_block_end(buffer: &[u8]) -> Option<usize> {
    let mut newlines = 0;
    for (i, byte) in buffer.iter().enumerate() {
        match byte {
            b'\n' => {
                newlines += 1;
                if newlines == 2 {
                    return Some(i + 1);
                }
            }
            b'\r' => {}
            _ => newlines = 0,
        }
    }
    None
}

/// Iterate `name:value` header lines of a text header block, skipping the first line.
pub(crate) fn header_lines(block: &[u8]) -> impl Iterator<Item = (&str, &str)> {
    block
        .split(|byte| *byte == b'\n')
        .skip(1)
        .filter_map(|line| std::str::from_utf8(line).ok())
        .map(|line| line.trim_end_matches('\r'))
        .take_while(|line| !line.is_empty())
        .filter_map(|line| line.split_once(':'))
}
