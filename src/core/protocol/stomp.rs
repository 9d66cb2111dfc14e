//! STOMP `CONNECT` / `STOMP` frame matcher.
use super::{Detection, ProtocolKind, ProtocolMatcher, header_block_end, header_lines};

const COMMANDS: [&[u8]; 2] = [b"CONNECT", b"STOMP"];

/// Matches STOMP 1.0 - 1.2 connection frames.
///
/// The frame may be preceded by heart-beat EOLs. A match requires the whole
/// header block so that the `host` header is available for routing.
#[derive(Debug, Default, Clone, Copy)]
pub struct StompMatcher;

impl StompMatcher {
    fn frame(buffer: &[u8]) -> &[u8] {
        let start = buffer
            .iter()
            .position(|byte| *byte != b'\n' && *byte != b'\r')
            .unwrap_or(buffer.len());
        &buffer[start..]
    }
}

/// State of the command line against one expected command
fn command_line(frame: &[u8], command: &[u8]) -> Detection {
    if frame.len() <= command.len() {
        return if command.starts_with(frame) {
            Detection::NeedMore
        } else {
            Detection::Reject
        };
    }
    if !frame.starts_with(command) {
        return Detection::Reject;
    }
    match &frame[command.len()..] {
        [b'\n', ..] | [b'\r', b'\n', ..] => Detection::Match,
        [b'\r'] => Detection::NeedMore,
        _ => Detection::Reject,
    }
}

impl ProtocolMatcher for StompMatcher {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Stomp
    }

    fn classify(&self, buffer: &[u8]) -> Detection {
        let frame = Self::frame(buffer);
        if frame.is_empty() {
            return Detection::NeedMore;
        }

        let mut pending = false;
        for command in COMMANDS {
            match command_line(frame, command) {
                Detection::Match => {
                    return if header_block_end(frame).is_some() {
                        Detection::Match
                    } else {
                        Detection::NeedMore
                    };
                }
                Detection::NeedMore => pending = true,
                Detection::Reject => {}
            }
        }

        if pending {
            Detection::NeedMore
        } else {
            Detection::Reject
        }
    }

    fn virtual_host(&self, buffer: &[u8]) -> Option<String> {
        header_lines(Self::frame(buffer))
            .find(|(name, _)| *name == "host")
            .map(|(_, value)| value.trim().to_string())
            .filter(|host| !host.is_empty())
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["stomp", "tcp"]
    }
}
