//! Recursive-descent decoder
//!
//! Works directly on UTF-8 bytes with one byte of lookahead. Binary blocks
//! come back as `Bytes` slices of the input, so a decoded memory read or
//! file chunk shares the receive buffer instead of being copied.
//!
//! Any structural violation aborts the whole document. There is no
//! recovery and no partially built container is ever returned.

use crate::constants::{BINARY_SENTINEL, CONTEXT_WINDOW, DEFAULT_MAX_DEPTH, NAN_LITERAL, SEQUENCE_TERMINATOR};
use crate::error::{CodecError, CodecResult};
use crate::number::Number;
use crate::value::{Value, ValueMap};
use bytes::Bytes;
use std::sync::Arc;

/// Decoder limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Maximum list/map nesting before the input is rejected
    pub max_depth: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Decoder over one input buffer; the string scratch buffer is per instance
pub struct Decoder {
    input: Bytes,
    pos: usize,
    depth: usize,
    options: DecodeOptions,
    scratch: Vec<u8>,
}

impl Decoder {
    pub fn new(input: impl Into<Bytes>) -> Self {
        Self::with_options(input, DecodeOptions::default())
    }

    pub fn with_options(input: impl Into<Bytes>, options: DecodeOptions) -> Self {
        Self {
            input: input.into(),
            pos: 0,
            depth: 0,
            options,
            scratch: Vec::new(),
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// Decode exactly one document; trailing non-whitespace is an error
    pub fn read_document(&mut self) -> CodecResult<Value> {
        let value = self.read_value()?;
        self.skip_whitespace();
        if !self.is_at_end() {
            return Err(self.malformed("unexpected data after document"));
        }
        Ok(value)
    }

    /// Decode NUL-terminated documents until the input is exhausted
    pub fn read_sequence(&mut self) -> CodecResult<Vec<Value>> {
        let mut values = Vec::new();
        while !self.is_at_end() {
            let value = self.read_value()?;
            match self.next_byte() {
                Some(SEQUENCE_TERMINATOR) => values.push(value),
                Some(_) => {
                    self.pos -= 1;
                    return Err(self.malformed("expected sequence terminator"));
                }
                None => return Err(self.unexpected_end("sequence terminator")),
            }
        }
        Ok(values)
    }

    pub fn read_value(&mut self) -> CodecResult<Value> {
        self.skip_whitespace();
        match self.peek() {
            None => Err(self.unexpected_end("value")),
            Some(b'n') => self.read_literal("null", Value::Null),
            Some(b't') => self.read_literal("true", Value::Bool(true)),
            Some(b'f') => self.read_literal("false", Value::Bool(false)),
            Some(b'N') => self.read_literal(NAN_LITERAL, Value::Number(Number::NaN)),
            Some(b'-' | b'0'..=b'9') => self.read_number(),
            Some(b'"') => self.read_string().map(Value::Text),
            Some(b'[') => self.read_list(),
            Some(b'{') => self.read_map(),
            Some(b'(') => self.read_binary(),
            Some(other) => Err(self.malformed(format!(
                "unexpected character {:?}",
                char::from(other)
            ))),
        }
    }

    fn read_literal(&mut self, literal: &str, value: Value) -> CodecResult<Value> {
        let remaining = &self.input[self.pos..];
        if remaining.starts_with(literal.as_bytes()) {
            self.pos += literal.len();
            Ok(value)
        } else if literal.as_bytes().starts_with(remaining) {
            self.pos = self.input.len();
            Err(self.unexpected_end(format!("literal {literal:?}")))
        } else {
            Err(self.malformed(format!("expected literal {literal:?}")))
        }
    }

    fn read_number(&mut self) -> CodecResult<Value> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_digit() || matches!(b, b'-' | b'+' | b'.' | b'e' | b'E') {
                self.pos += 1;
            } else {
                break;
            }
        }
        // The scanned range is ASCII only
        let literal = String::from_utf8_lossy(&self.input[start..self.pos]).into_owned();
        Number::parse_literal(&literal)
            .map(Value::Number)
            .ok_or_else(|| CodecError::InvalidNumber {
                offset: start,
                context: self.context(),
                literal,
            })
    }

    fn read_string(&mut self) -> CodecResult<String> {
        self.expect(b'"')?;
        let start = self.pos;

        // Fast path: no escapes, borrow the raw run directly
        loop {
            match self.peek() {
                None => return Err(self.unexpected_end("closing '\"'")),
                Some(b'"') => {
                    let text = std::str::from_utf8(&self.input[start..self.pos])
                        .map_err(|e| self.invalid_utf8(start + e.valid_up_to()))?
                        .to_owned();
                    self.pos += 1;
                    return Ok(text);
                }
                Some(b'\\') => break,
                Some(_) => self.pos += 1,
            }
        }

        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        scratch.extend_from_slice(&self.input[start..self.pos]);
        let result = self.read_escaped_tail(&mut scratch, start);
        self.scratch = scratch;
        result
    }

    fn read_escaped_tail(&mut self, scratch: &mut Vec<u8>, start: usize) -> CodecResult<String> {
        loop {
            match self.next_byte() {
                None => return Err(self.unexpected_end("closing '\"'")),
                Some(b'"') => break,
                Some(b'\\') => {
                    let escape_at = self.pos - 1;
                    let decoded = match self.next_byte() {
                        None => return Err(self.unexpected_end("escape character")),
                        Some(b'"') => '"',
                        Some(b'\\') => '\\',
                        Some(b'/') => '/',
                        Some(b'b') => '\u{8}',
                        Some(b'f') => '\u{c}',
                        Some(b'n') => '\n',
                        Some(b'r') => '\r',
                        Some(b't') => '\t',
                        Some(b'u') => self.read_unicode_escape(escape_at)?,
                        Some(other) => {
                            return Err(CodecError::invalid_escape(
                                escape_at,
                                format!("unknown escape '\\{}'", char::from(other)),
                                self.context(),
                            ))
                        }
                    };
                    let mut utf8 = [0u8; 4];
                    scratch.extend_from_slice(decoded.encode_utf8(&mut utf8).as_bytes());
                }
                Some(b) => scratch.push(b),
            }
        }

        match std::str::from_utf8(scratch) {
            Ok(text) => Ok(text.to_owned()),
            Err(e) => Err(self.invalid_utf8(start + e.valid_up_to())),
        }
    }

    /// Called after `\u`; combines surrogate pairs into one scalar value
    fn read_unicode_escape(&mut self, escape_at: usize) -> CodecResult<char> {
        let high = self.read_hex4(escape_at)?;
        let code = match high {
            0xD800..=0xDBFF => {
                if self.input.get(self.pos..self.pos + 2) != Some(&b"\\u"[..]) {
                    return Err(self.invalid_surrogate(escape_at, high));
                }
                self.pos += 2;
                let low = self.read_hex4(escape_at)?;
                if !(0xDC00..=0xDFFF).contains(&low) {
                    return Err(self.invalid_surrogate(escape_at, high));
                }
                0x10000 + ((u32::from(high) - 0xD800) << 10) + (u32::from(low) - 0xDC00)
            }
            0xDC00..=0xDFFF => return Err(self.invalid_surrogate(escape_at, high)),
            other => u32::from(other),
        };
        char::from_u32(code).ok_or_else(|| self.invalid_surrogate(escape_at, high))
    }

    fn read_hex4(&mut self, escape_at: usize) -> CodecResult<u16> {
        let Some(digits) = self.input.get(self.pos..self.pos + 4) else {
            self.pos = self.input.len();
            return Err(self.unexpected_end("four hex digits"));
        };
        let parsed = std::str::from_utf8(digits)
            .ok()
            .filter(|s| s.bytes().all(|b| b.is_ascii_hexdigit()))
            .and_then(|s| u16::from_str_radix(s, 16).ok());
        match parsed {
            Some(unit) => {
                self.pos += 4;
                Ok(unit)
            }
            None => Err(CodecError::invalid_escape(
                escape_at,
                "expected four hex digits after '\\u'",
                self.context(),
            )),
        }
    }

    fn read_list(&mut self) -> CodecResult<Value> {
        self.expect(b'[')?;
        self.enter()?;
        let mut items = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some(b']') {
            self.pos += 1;
        } else {
            loop {
                items.push(self.read_value()?);
                self.skip_whitespace();
                match self.next_byte() {
                    Some(b',') => continue,
                    Some(b']') => break,
                    Some(_) => {
                        self.pos -= 1;
                        return Err(self.malformed("expected ',' or ']'"));
                    }
                    None => return Err(self.unexpected_end("',' or ']'")),
                }
            }
        }
        self.depth -= 1;
        Ok(Value::List(Arc::new(items)))
    }

    fn read_map(&mut self) -> CodecResult<Value> {
        self.expect(b'{')?;
        self.enter()?;
        let mut entries = ValueMap::new();
        self.skip_whitespace();
        if self.peek() == Some(b'}') {
            self.pos += 1;
        } else {
            loop {
                self.skip_whitespace();
                if self.peek() != Some(b'"') {
                    return Err(match self.peek() {
                        None => self.unexpected_end("object key"),
                        Some(_) => self.malformed("expected string object key"),
                    });
                }
                let key = self.read_string()?;
                self.skip_whitespace();
                self.expect(b':')?;
                let value = self.read_value()?;
                entries.insert(key, value);
                self.skip_whitespace();
                match self.next_byte() {
                    Some(b',') => continue,
                    Some(b'}') => break,
                    Some(_) => {
                        self.pos -= 1;
                        return Err(self.malformed("expected ',' or '}'"));
                    }
                    None => return Err(self.unexpected_end("',' or '}'")),
                }
            }
        }
        self.depth -= 1;
        Ok(Value::Map(Arc::new(entries)))
    }

    fn read_binary(&mut self) -> CodecResult<Value> {
        self.expect(b'(')?;
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.malformed("expected binary length digits"));
        }
        // Digits only, so the lossy conversion is exact
        let declared: usize = String::from_utf8_lossy(&self.input[start..self.pos])
            .parse()
            .map_err(|_| self.malformed("binary length out of range"))?;
        self.expect(b')')?;
        self.expect(BINARY_SENTINEL)?;

        let available = self.input.len() - self.pos;
        if declared > available {
            return Err(CodecError::BinaryTruncated {
                offset: self.pos,
                declared,
                available,
                context: self.context(),
            });
        }
        let data = self.input.slice(self.pos..self.pos + declared);
        self.pos += declared;
        Ok(Value::Binary(data))
    }

    fn enter(&mut self) -> CodecResult<()> {
        self.depth += 1;
        if self.depth > self.options.max_depth {
            return Err(CodecError::DepthExceeded {
                offset: self.pos,
                max_depth: self.options.max_depth,
                context: self.context(),
            });
        }
        Ok(())
    }

    fn expect(&mut self, expected: u8) -> CodecResult<()> {
        match self.peek() {
            Some(b) if b == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(_) => Err(self.malformed(format!("expected {:?}", char::from(expected)))),
            None => Err(self.unexpected_end(format!("{:?}", char::from(expected)))),
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn next_byte(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    /// Up to `CONTEXT_WINDOW` bytes ending at the failing byte.
    ///
    /// Control characters and bytes that are not part of a complete
    /// character in the window each render as one `.`.
    fn context(&self) -> String {
        let end = (self.pos + 1).min(self.input.len());
        let start = end.saturating_sub(CONTEXT_WINDOW);
        let mut rest = &self.input[start..end];
        let mut out = String::with_capacity(rest.len());
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    push_printable(&mut out, text);
                    break;
                }
                Err(e) => {
                    let (valid, tail) = rest.split_at(e.valid_up_to());
                    // `valid` was just checked by from_utf8
                    push_printable(&mut out, std::str::from_utf8(valid).unwrap_or_default());
                    let bad = e.error_len().unwrap_or(tail.len());
                    out.extend(std::iter::repeat('.').take(bad));
                    rest = &tail[bad..];
                }
            }
        }
        out
    }

    fn malformed(&self, description: impl Into<String>) -> CodecError {
        CodecError::malformed(self.pos, description, self.context())
    }

    fn unexpected_end(&self, expected: impl Into<String>) -> CodecError {
        CodecError::unexpected_end(self.pos, expected, self.context())
    }

    fn invalid_utf8(&self, offset: usize) -> CodecError {
        CodecError::InvalidUtf8 {
            offset,
            context: self.context(),
        }
    }

    fn invalid_surrogate(&self, offset: usize, code_unit: u16) -> CodecError {
        CodecError::InvalidSurrogate {
            offset,
            code_unit,
            context: self.context(),
        }
    }
}

fn push_printable(out: &mut String, text: &str) {
    out.extend(text.chars().map(|c| if c.is_control() { '.' } else { c }));
}

/// Decode one document
pub fn decode(input: impl Into<Bytes>) -> CodecResult<Value> {
    Decoder::new(input).read_document()
}

/// Decode one document from a borrowed slice (copies the input)
pub fn decode_slice(input: &[u8]) -> CodecResult<Value> {
    decode(Bytes::copy_from_slice(input))
}

/// Decode NUL-terminated documents; any failure aborts the whole sequence
pub fn decode_sequence(input: impl Into<Bytes>) -> CodecResult<Vec<Value>> {
    Decoder::new(input).read_sequence()
}
