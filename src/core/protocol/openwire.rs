use super::{Detection, ProtocolKind, ProtocolMatcher, match_pattern};

/// Size prefix, `WireFormatInfo` command type, then the `ActiveMQ` magic.
const WIRE_FORMAT_INFO: [Option<u8>; 13] = [
    None,
    None,
    None,
    None,
    Some(0x01),
    Some(b'A'),
    Some(b'c'),
    Some(b't'),
    Some(b'i'),
    Some(b'v'),
    Some(b'e'),
    Some(b'M'),
    Some(b'Q'),
];

/// Matches the `WireFormatInfo` command an OpenWire client opens with.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenWireMatcher;

impl ProtocolMatcher for OpenWireMatcher {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::OpenWire
    }

    fn classify(&self, buffer: &[u8]) -> Detection {
        match_pattern(buffer, &WIRE_FORMAT_INFO)
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["openwire", "tcp"]
    }
}
