//! HTTP/1.x request matcher.
use super::{Detection, ProtocolKind, ProtocolMatcher, header_block_end, header_lines};

const METHODS: [&[u8]; 9] = [
    b"GET ",
    b"HEAD ",
    b"POST ",
    b"PUT ",
    b"DELETE ",
    b"OPTIONS ",
    b"TRACE ",
    b"CONNECT ",
    b"PATCH ",
];

/// Matches plain HTTP/1.x requests once their header block is complete.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpMatcher;

impl ProtocolMatcher for HttpMatcher {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Http
    }

    fn classify(&self, buffer: &[u8]) -> Detection {
        if buffer.is_empty() {
            return Detection::NeedMore;
        }

        if METHODS.iter().any(|method| buffer.starts_with(method)) {
            return if header_block_end(buffer).is_some() {
                Detection::Match
            } else {
                Detection::NeedMore
            };
        }

        if METHODS.iter().any(|method| method.starts_with(buffer)) {
            Detection::NeedMore
        } else {
            Detection::Reject
        }
    }

    fn virtual_host(&self, buffer: &[u8]) -> Option<String> {
        header_lines(buffer)
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("host"))
            .map(|(_, value)| strip_port(value.trim()).to_string())
            .filter(|host| !host.is_empty())
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["http", "tcp"]
    }
}

/// `host:port` → `host`, keeping bracketed IPv6 literals intact.
pub(crate) fn strip_port(authority: &str) -> &str {
    if authority.starts_with('[') {
        return match authority.find(']') {
            Some(end) => &authority[..=end],
            None => authority,
        };
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.bytes().all(|b| b.is_ascii_digit()) => {
            host
        }
        _ => authority,
    }
}
