//! Wire constants shared by the encoder and decoder

/// Control byte that follows `(<length>)` and precedes raw binary bytes
pub const BINARY_SENTINEL: u8 = 0x01;

/// Terminator written after every document of a sequence
pub const SEQUENCE_TERMINATOR: u8 = 0x00;

/// Maximum number of input bytes quoted in a decode error
pub const CONTEXT_WINDOW: usize = 100;

/// Default nesting limit for lists and maps
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// Literal accepted and produced for the floating point sentinel
pub const NAN_LITERAL: &str = "NaN";
