//! Codec errors for value marshaling
//!
//! Every decode failure carries the byte offset where parsing stopped and a
//! bounded snippet of the input consumed just before it. The snippet is at
//! most [`CONTEXT_WINDOW`](crate::constants::CONTEXT_WINDOW) bytes, so error
//! reporting never retains the whole buffer.

use thiserror::Error;

/// Errors raised while encoding or decoding values
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Structural violation: unexpected character, missing separator or bracket
    #[error("Malformed input at byte {offset}: {description} (context: {context:?})")]
    Malformed {
        offset: usize,
        description: String,
        context: String,
    },

    /// Input ended in the middle of a document
    #[error("Unexpected end of input at byte {offset}: expected {expected} (context: {context:?})")]
    UnexpectedEnd {
        offset: usize,
        expected: String,
        context: String,
    },

    /// Raw string bytes are not valid UTF-8
    #[error("Invalid UTF-8 in string at byte {offset} (context: {context:?})")]
    InvalidUtf8 { offset: usize, context: String },

    /// Unknown escape or malformed `\u` hex digits
    #[error("Invalid escape sequence at byte {offset}: {description} (context: {context:?})")]
    InvalidEscape {
        offset: usize,
        description: String,
        context: String,
    },

    /// `\u` escape produced an unpaired UTF-16 surrogate
    #[error("Unpaired surrogate {code_unit:#06x} at byte {offset} (context: {context:?})")]
    InvalidSurrogate {
        offset: usize,
        code_unit: u16,
        context: String,
    },

    /// Numeric literal does not follow the number grammar
    #[error("Invalid number {literal:?} at byte {offset} (context: {context:?})")]
    InvalidNumber {
        offset: usize,
        literal: String,
        context: String,
    },

    /// Zero-copy binary block declares more bytes than the input holds
    #[error("Truncated binary block at byte {offset}: declared {declared} bytes, {available} available (context: {context:?})")]
    BinaryTruncated {
        offset: usize,
        declared: usize,
        available: usize,
        context: String,
    },

    /// Nesting exceeded the configured maximum depth
    #[error("Nesting deeper than {max_depth} levels at byte {offset} (context: {context:?})")]
    DepthExceeded {
        offset: usize,
        max_depth: usize,
        context: String,
    },

    /// Text value could not be interpreted as base64 binary
    #[error("Invalid base64 binary: {0}")]
    InvalidBase64(String),

    /// Value has the wrong shape for the requested conversion
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// No object writer accepts the given application type
    #[error("No object writer registered for {type_name}")]
    NoWriter { type_name: String },
}

impl CodecError {
    pub fn malformed(offset: usize, description: impl Into<String>, context: String) -> Self {
        Self::Malformed {
            offset,
            description: description.into(),
            context,
        }
    }

    pub fn unexpected_end(offset: usize, expected: impl Into<String>, context: String) -> Self {
        Self::UnexpectedEnd {
            offset,
            expected: expected.into(),
            context,
        }
    }

    pub fn invalid_escape(offset: usize, description: impl Into<String>, context: String) -> Self {
        Self::InvalidEscape {
            offset,
            description: description.into(),
            context,
        }
    }

    /// Byte offset of a decode failure, `None` for encode-side errors
    pub fn offset(&self) -> Option<usize> {
        match self {
            Self::Malformed { offset, .. }
            | Self::UnexpectedEnd { offset, .. }
            | Self::InvalidUtf8 { offset, .. }
            | Self::InvalidEscape { offset, .. }
            | Self::InvalidSurrogate { offset, .. }
            | Self::InvalidNumber { offset, .. }
            | Self::BinaryTruncated { offset, .. }
            | Self::DepthExceeded { offset, .. } => Some(*offset),
            Self::InvalidBase64(_) | Self::TypeMismatch { .. } | Self::NoWriter { .. } => None,
        }
    }

    /// Bounded input snippet preceding a decode failure
    pub fn context(&self) -> Option<&str> {
        match self {
            Self::Malformed { context, .. }
            | Self::UnexpectedEnd { context, .. }
            | Self::InvalidUtf8 { context, .. }
            | Self::InvalidEscape { context, .. }
            | Self::InvalidSurrogate { context, .. }
            | Self::InvalidNumber { context, .. }
            | Self::BinaryTruncated { context, .. }
            | Self::DepthExceeded { context, .. } => Some(context),
            Self::InvalidBase64(_) | Self::TypeMismatch { .. } | Self::NoWriter { .. } => None,
        }
    }

    /// True for errors produced by the decoder on malformed input
    pub fn is_decode_error(&self) -> bool {
        self.offset().is_some()
    }
}

/// Result type for codec operations
pub type CodecResult<T> = std::result::Result<T, CodecError>;
