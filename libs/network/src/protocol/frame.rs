//! Channel frame layout
//!
//! Every frame is one transport message. Header fields are separated by
//! NUL; the payload that follows is a codec document sequence, so every
//! argument or data value is itself NUL-terminated.
//!
//! ```text
//! C \0 <token> \0 <service> \0 <command> \0 <arg>\0 <arg>\0 ...
//! R \0 <token> \0 <data>\0 ...
//! P \0 <token> \0 <data>\0 ...
//! N \0 <token> \0
//! E \0 <service> \0 <event> \0 <data>\0 ...
//! F \0 <level> \0
//! ```
//!
//! Payload parsing runs on a `Bytes` slice of the received message, which
//! keeps zero-copy binary values pointing into the receive buffer.

use crate::error::ChannelError;
use bytes::Bytes;
use codec::{DecodeOptions, Decoder, EncodeOptions, Encoder, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Command {
        token: String,
        service: String,
        command: String,
        args: Vec<Value>,
    },
    Result {
        token: String,
        data: Vec<Value>,
    },
    Progress {
        token: String,
        data: Vec<Value>,
    },
    NotRecognized {
        token: String,
    },
    Event {
        service: String,
        name: String,
        data: Vec<Value>,
    },
    Flow {
        level: i32,
    },
}

impl Frame {
    /// Frame type marker as it appears on the wire
    pub fn kind(&self) -> char {
        match self {
            Self::Command { .. } => 'C',
            Self::Result { .. } => 'R',
            Self::Progress { .. } => 'P',
            Self::NotRecognized { .. } => 'N',
            Self::Event { .. } => 'E',
            Self::Flow { .. } => 'F',
        }
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Command { token, .. }
            | Self::Result { token, .. }
            | Self::Progress { token, .. }
            | Self::NotRecognized { token } => Some(token),
            Self::Event { .. } | Self::Flow { .. } => None,
        }
    }

    pub fn encode(&self, options: EncodeOptions) -> Bytes {
        let mut encoder = Encoder::with_options(options);
        let mut marker = [0u8; 4];
        encoder.write_field(self.kind().encode_utf8(&mut marker));

        let payload: &[Value] = match self {
            Self::Command {
                token,
                service,
                command,
                args,
            } => {
                encoder.write_field(token);
                encoder.write_field(service);
                encoder.write_field(command);
                args
            }
            Self::Result { token, data } | Self::Progress { token, data } => {
                encoder.write_field(token);
                data
            }
            Self::NotRecognized { token } => {
                encoder.write_field(token);
                &[]
            }
            Self::Event {
                service,
                name,
                data,
            } => {
                encoder.write_field(service);
                encoder.write_field(name);
                data
            }
            Self::Flow { level } => {
                encoder.write_field(&level.to_string());
                &[]
            }
        };

        for value in payload {
            encoder.write_document(value);
        }
        encoder.to_bytes()
    }

    pub fn decode(message: Bytes, options: DecodeOptions) -> Result<Self, ChannelError> {
        let mut fields = FieldReader::new(&message);
        let kind = fields.next_field("frame type")?;

        let frame = match kind {
            "C" => {
                let token = fields.next_field("token")?.to_string();
                let service = fields.next_field("service")?.to_string();
                let command = fields.next_field("command")?.to_string();
                let args = fields.payload(&message, options)?;
                Self::Command {
                    token,
                    service,
                    command,
                    args,
                }
            }
            "R" => {
                let token = fields.next_field("token")?.to_string();
                let data = fields.payload(&message, options)?;
                Self::Result { token, data }
            }
            "P" => {
                let token = fields.next_field("token")?.to_string();
                let data = fields.payload(&message, options)?;
                Self::Progress { token, data }
            }
            "N" => {
                let token = fields.next_field("token")?.to_string();
                fields.expect_end()?;
                Self::NotRecognized { token }
            }
            "E" => {
                let service = fields.next_field("service")?.to_string();
                let name = fields.next_field("event")?.to_string();
                let data = fields.payload(&message, options)?;
                Self::Event {
                    service,
                    name,
                    data,
                }
            }
            "F" => {
                let raw = fields.next_field("flow level")?;
                let level = raw
                    .parse()
                    .map_err(|_| ChannelError::protocol(format!("invalid flow level {raw:?}")))?;
                fields.expect_end()?;
                Self::Flow { level }
            }
            other => {
                return Err(ChannelError::protocol(format!(
                    "unknown frame type {other:?}"
                )))
            }
        };
        Ok(frame)
    }
}

/// Splits NUL-terminated header fields off the front of a message
struct FieldReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn next_field(&mut self, what: &str) -> Result<&'a str, ChannelError> {
        let bytes: &'a [u8] = self.bytes;
        let rest = &bytes[self.pos..];
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| ChannelError::protocol(format!("missing {what} field")))?;
        let field = std::str::from_utf8(&rest[..len])
            .map_err(|_| ChannelError::protocol(format!("{what} field is not UTF-8")))?;
        self.pos += len + 1;
        Ok(field)
    }

    fn expect_end(&self) -> Result<(), ChannelError> {
        if self.pos == self.bytes.len() {
            Ok(())
        } else {
            Err(ChannelError::protocol("unexpected data after frame header"))
        }
    }

    fn payload(&self, message: &Bytes, options: DecodeOptions) -> Result<Vec<Value>, ChannelError> {
        let mut decoder = Decoder::with_options(message.slice(self.pos..), options);
        Ok(decoder.read_sequence()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(frame: &Frame) -> Frame {
        Frame::decode(frame.encode(EncodeOptions::zero_copy()), DecodeOptions::default()).unwrap()
    }

    #[test]
    fn test_command_layout() {
        let frame = Frame::Command {
            token: "7".into(),
            service: "RunControl".into(),
            command: "resume".into(),
            args: vec![Value::from("P1.T3"), Value::from(0)],
        };
        let wire = frame.encode(EncodeOptions::default());
        assert_eq!(&wire[..], b"C\x007\x00RunControl\x00resume\x00\"P1.T3\"\x000\x00");
        assert_eq!(round_trip(&frame), frame);
    }

    #[test]
    fn test_all_frame_kinds_round_trip() {
        let frames = [
            Frame::Result {
                token: "1".into(),
                data: vec![Value::Null, Value::binary(&b"\x00\x01\x02"[..])],
            },
            Frame::Progress {
                token: "2".into(),
                data: vec![Value::from(50)],
            },
            Frame::NotRecognized { token: "3".into() },
            Frame::Event {
                service: "Locator".into(),
                name: "Hello".into(),
                data: vec![Value::list([Value::from("Locator")])],
            },
            Frame::Flow { level: -25 },
        ];
        for frame in &frames {
            assert_eq!(&round_trip(frame), frame);
        }
    }

    #[test]
    fn test_binary_payload_is_not_copied() {
        let frame = Frame::Result {
            token: "9".into(),
            data: vec![Value::binary(vec![0xEEu8; 1024])],
        };
        let wire = frame.encode(EncodeOptions::zero_copy());
        let start = wire.as_ptr() as usize;
        let end = start + wire.len();

        let Frame::Result { data, .. } = Frame::decode(wire.clone(), DecodeOptions::default()).unwrap() else {
            panic!("expected result frame");
        };
        let ptr = data[0].as_binary().unwrap().as_ptr() as usize;
        assert!(ptr >= start && ptr < end);
    }

    #[test]
    fn test_malformed_frames() {
        let opts = DecodeOptions::default();
        assert!(Frame::decode(Bytes::from_static(b"X\x001\x00"), opts).is_err());
        assert!(Frame::decode(Bytes::from_static(b"R\x00"), opts).is_err());
        assert!(Frame::decode(Bytes::from_static(b"N\x001\x00junk"), opts).is_err());
        assert!(Frame::decode(Bytes::from_static(b"F\x00high\x00"), opts).is_err());
        assert!(matches!(
            Frame::decode(Bytes::from_static(b"R\x001\x00{\"a\":}\x00"), opts),
            Err(ChannelError::Codec(_))
        ));
    }
}
