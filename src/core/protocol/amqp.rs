use super::{Detection, ProtocolKind, ProtocolMatcher, match_pattern};

/// `AMQP` followed by the four protocol id / version bytes.
const HEADER: [Option<u8>; 8] = [
    Some(b'A'),
    Some(b'M'),
    Some(b'Q'),
    Some(b'P'),
    None,
    None,
    None,
    None,
];

/// Matches the AMQP protocol header (0-9-1 and 1.0).
#[derive(Debug, Default, Clone, Copy)]
pub struct AmqpMatcher;

impl ProtocolMatcher for AmqpMatcher {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Amqp
    }

    fn classify(&self, buffer: &[u8]) -> Detection {
        match_pattern(buffer, &HEADER)
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["amqp", "tcp"]
    }
}
