//! Value encoder with optional zero-copy binary blocks
//!
//! ## Two-pass binary splicing
//!
//! In zero-copy mode a binary value is written to the provisional text
//! buffer as `(<length>)` only. The payload itself is recorded in a side
//! list of splices keyed by text offset. [`Encoder::to_bytes`] walks that
//! list once, copying text runs and inserting the sentinel byte followed by
//! the raw payload at each recorded offset:
//!
//! ```text
//! text:    {"data":(5),"len":5}
//!                     ^ splice @ 12 -> 0x01 + 5 raw bytes
//! output:  {"data":(5)\x01HELLO,"len":5}
//! ```
//!
//! The splice tag lives out of band, so no byte of the text buffer is ever
//! reinterpreted. Strings always escape control bytes, which keeps a literal
//! 0x01 out of the text altogether.
//!
//! Without zero-copy, binary values become base64 strings.

use crate::constants::{BINARY_SENTINEL, SEQUENCE_TERMINATOR};
use crate::value::Value;
use base64::Engine as _;
use bytes::{BufMut, Bytes, BytesMut};

/// Encoder behaviour switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncodeOptions {
    /// Emit binary values as raw spliced blocks instead of base64 text
    pub zero_copy: bool,
}

impl EncodeOptions {
    pub const fn zero_copy() -> Self {
        Self { zero_copy: true }
    }
}

#[derive(Debug, Clone)]
struct Splice {
    offset: usize,
    data: Bytes,
}

/// Reusable encoder; owns its staging buffers
#[derive(Debug, Default)]
pub struct Encoder {
    options: EncodeOptions,
    text: Vec<u8>,
    splices: Vec<Splice>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: EncodeOptions) -> Self {
        Self {
            options,
            text: Vec::with_capacity(256),
            splices: Vec::new(),
        }
    }

    pub fn options(&self) -> EncodeOptions {
        self.options
    }

    /// Drop staged output, keeping allocations for reuse
    pub fn clear(&mut self) {
        self.text.clear();
        self.splices.clear();
    }

    /// True when nothing has been written since the last clear
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.splices.is_empty()
    }

    /// Final encoded length including sentinels and spliced payloads
    pub fn encoded_len(&self) -> usize {
        self.text.len()
            + self
                .splices
                .iter()
                .map(|s| 1 + s.data.len())
                .sum::<usize>()
    }

    pub fn write_value(&mut self, value: &Value) {
        match value {
            Value::Null => self.text.extend_from_slice(b"null"),
            Value::Bool(true) => self.text.extend_from_slice(b"true"),
            Value::Bool(false) => self.text.extend_from_slice(b"false"),
            Value::Number(n) => self.text.extend_from_slice(n.to_string().as_bytes()),
            Value::Text(s) => self.write_string(s),
            Value::List(items) => {
                self.text.push(b'[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.text.push(b',');
                    }
                    self.write_value(item);
                }
                self.text.push(b']');
            }
            Value::Map(entries) => {
                self.text.push(b'{');
                for (i, (key, item)) in entries.iter().enumerate() {
                    if i > 0 {
                        self.text.push(b',');
                    }
                    self.write_string(key);
                    self.text.push(b':');
                    self.write_value(item);
                }
                self.text.push(b'}');
            }
            Value::Binary(data) => self.write_binary(data),
        }
    }

    /// Write one sequence document: the value followed by its terminator
    pub fn write_document(&mut self, value: &Value) {
        self.write_value(value);
        self.text.push(SEQUENCE_TERMINATOR);
    }

    /// Write a verbatim header field followed by the terminator.
    ///
    /// Used for frame headers (tokens, service and command names), which are
    /// plain identifiers and never contain a NUL byte.
    pub fn write_field(&mut self, field: &str) {
        self.text.extend_from_slice(field.as_bytes());
        self.text.push(SEQUENCE_TERMINATOR);
    }

    fn write_binary(&mut self, data: &Bytes) {
        if self.options.zero_copy {
            self.text.push(b'(');
            self.text.extend_from_slice(data.len().to_string().as_bytes());
            self.text.push(b')');
            self.splices.push(Splice {
                offset: self.text.len(),
                data: data.clone(),
            });
        } else {
            self.text.push(b'"');
            let encoded = base64::engine::general_purpose::STANDARD.encode(data);
            self.text.extend_from_slice(encoded.as_bytes());
            self.text.push(b'"');
        }
    }

    fn write_string(&mut self, s: &str) {
        self.text.push(b'"');
        let bytes = s.as_bytes();
        let mut run_start = 0;
        for (i, &b) in bytes.iter().enumerate() {
            let escape: &[u8] = match b {
                b'"' => b"\\\"",
                b'\\' => b"\\\\",
                0x08 => b"\\b",
                0x0c => b"\\f",
                b'\n' => b"\\n",
                b'\r' => b"\\r",
                b'\t' => b"\\t",
                0x00..=0x1f => {
                    self.text.extend_from_slice(&bytes[run_start..i]);
                    self.text.extend_from_slice(format!("\\u{b:04x}").as_bytes());
                    run_start = i + 1;
                    continue;
                }
                // Multi-byte UTF-8 sequences only contain bytes >= 0x80
                _ => continue,
            };
            self.text.extend_from_slice(&bytes[run_start..i]);
            self.text.extend_from_slice(escape);
            run_start = i + 1;
        }
        self.text.extend_from_slice(&bytes[run_start..]);
        self.text.push(b'"');
    }

    /// Splice pass: text runs plus sentinel and raw payload at each splice
    pub fn to_bytes(&self) -> Bytes {
        if self.splices.is_empty() {
            return Bytes::copy_from_slice(&self.text);
        }

        let mut out = BytesMut::with_capacity(self.encoded_len());
        let mut last = 0;
        for splice in &self.splices {
            out.put_slice(&self.text[last..splice.offset]);
            out.put_u8(BINARY_SENTINEL);
            out.put_slice(&splice.data);
            last = splice.offset;
        }
        out.put_slice(&self.text[last..]);
        out.freeze()
    }
}

/// Encode a single document without zero-copy
pub fn encode(value: &Value) -> Bytes {
    encode_with(value, EncodeOptions::default())
}

pub fn encode_with(value: &Value, options: EncodeOptions) -> Bytes {
    let mut encoder = Encoder::with_options(options);
    encoder.write_value(value);
    encoder.to_bytes()
}

/// Encode consecutive NUL-terminated documents
pub fn encode_sequence(values: &[Value]) -> Bytes {
    encode_sequence_with(values, EncodeOptions::default())
}

pub fn encode_sequence_with(values: &[Value], options: EncodeOptions) -> Bytes {
    let mut encoder = Encoder::with_options(options);
    for value in values {
        encoder.write_document(value);
    }
    encoder.to_bytes()
}
