//! MQTT CONNECT packet matcher (3.1, 3.1.1 and 5.0).
use super::{Detection, ProtocolKind, ProtocolMatcher};

const CONNECT_HEADER: u8 = 0x10;
const PROTOCOL_NAMES: [&[u8]; 2] = [b"MQTT", b"MQIsdp"];

const FLAG_WILL: u8 = 0x04;
const FLAG_USERNAME: u8 = 0x80;
const PROTOCOL_LEVEL_5: u8 = 5;

/// Matches a complete MQTT CONNECT packet.
///
/// The virtual host is the part of the user name before the first `/`,
/// e.g. `tenant-a/alice` routes to `tenant-a`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MqttMatcher;

enum VarInt {
    Value { value: usize, len: usize },
    Incomplete,
    Malformed,
}

/// MQTT variable byte integer, at most four bytes.
fn read_varint(buffer: &[u8]) -> VarInt {
    let mut value = 0usize;
    for (i, byte) in buffer.iter().take(4).enumerate() {
        value |= usize::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return VarInt::Value { value, len: i + 1 };
        }
    }
    if buffer.len() >= 4 {
        VarInt::Malformed
    } else {
        VarInt::Incomplete
    }
}

impl ProtocolMatcher for MqttMatcher {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Mqtt
    }

    fn classify(&self, buffer: &[u8]) -> Detection {
        let Some(first) = buffer.first() else {
            return Detection::NeedMore;
        };
        if *first != CONNECT_HEADER {
            return Detection::Reject;
        }

        let (remaining, varint_len) = match read_varint(&buffer[1..]) {
            VarInt::Value { value, len } => (value, len),
            VarInt::Incomplete => return Detection::NeedMore,
            VarInt::Malformed => return Detection::Reject,
        };

        let variable_header = &buffer[1 + varint_len..];
        if variable_header.len() < 2 {
            return Detection::NeedMore;
        }
        let name_len = usize::from(u16::from_be_bytes([variable_header[0], variable_header[1]]));
        let Some(expected) = PROTOCOL_NAMES.iter().find(|name| name.len() == name_len) else {
            return Detection::Reject;
        };
        let name = &variable_header[2..];
        let seen = name.len().min(name_len);
        if name[..seen] != expected[..seen] {
            return Detection::Reject;
        }

        if buffer.len() >= 1 + varint_len + remaining {
            Detection::Match
        } else {
            Detection::NeedMore
        }
    }

    fn virtual_host(&self, buffer: &[u8]) -> Option<String> {
        let username = connect_username(buffer)?;
        username
            .split_once('/')
            .map(|(host, _)| host)
            .filter(|host| !host.is_empty())
            .map(str::to_string)
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["mqtt", "tcp"]
    }
}

/// Cursor over a CONNECT packet's body.
struct Reader<'a> {
    buffer: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.buffer.len() < len {
            return None;
        }
        let (head, tail) = self.buffer.split_at(len);
        self.buffer = tail;
        Some(head)
    }

    fn byte(&mut self) -> Option<u8> {
        self.take(1).map(|bytes| bytes[0])
    }

    fn u16(&mut self) -> Option<usize> {
        self.take(2)
            .map(|bytes| usize::from(u16::from_be_bytes([bytes[0], bytes[1]])))
    }

    fn prefixed(&mut self) -> Option<&'a [u8]> {
        let len = self.u16()?;
        self.take(len)
    }

    fn varint(&mut self) -> Option<usize> {
        match read_varint(self.buffer) {
            VarInt::Value { value, len } => {
                self.take(len)?;
                Some(value)
            }
            _ => None,
        }
    }

    fn skip_properties(&mut self) -> Option<()> {
        let len = self.varint()?;
        self.take(len).map(|_| ())
    }
}

fn connect_username(buffer: &[u8]) -> Option<&str> {
    let mut reader = Reader {
        buffer: buffer.get(1..)?,
    };
    reader.varint()?;
    reader.prefixed()?; // protocol name
    let level = reader.byte()?;
    let flags = reader.byte()?;
    reader.take(2)?; // keep alive
    if level == PROTOCOL_LEVEL_5 {
        reader.skip_properties()?;
    }

    reader.prefixed()?; // client id
    if flags & FLAG_WILL != 0 {
        if level == PROTOCOL_LEVEL_5 {
            reader.skip_properties()?;
        }
        reader.prefixed()?; // will topic
        reader.prefixed()?; // will payload
    }
    if flags & FLAG_USERNAME == 0 {
        return None;
    }
    std::str::from_utf8(reader.prefixed()?).ok()
}
