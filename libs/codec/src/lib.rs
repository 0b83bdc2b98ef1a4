//! # Tether Wire Codec
//!
//! ## Purpose
//!
//! Marshals the protocol's universal [`Value`] graph to and from a compact
//! JSON-derived text format:
//! - Standard JSON scalars, strings, arrays and objects
//! - Arbitrary precision numbers (narrowest exact integer, or decimal keyed
//!   by unscaled value and scale) plus a literal `NaN` sentinel
//! - A **zero-copy binary extension**: `(<length>)` + `0x01` + raw bytes
//! - Multi-document sequences, each document terminated by `\0`
//!
//! ## Architecture Role
//!
//! ```text
//! application values → [codec] → network/ frames → transport
//!     Value              Encoder/Decoder    Channel      TCP
//! ```
//!
//! ## What This Crate Does NOT Contain
//! - Frame layout, tokens or channels (belongs in network/)
//! - Any socket or transport logic
//!
//! ## Buffers
//!
//! Encoders and decoders own their staging buffers. Nothing is static, so
//! any number of channels can encode and decode concurrently.
//!
//! ## Usage
//!
//! ```rust
//! use codec::{decode, encode_with, EncodeOptions, Value};
//!
//! let value = Value::map([
//!     ("Addr", Value::from(4096)),
//!     ("Data", Value::binary(&b"\x7fELF"[..])),
//! ]);
//! let wire = encode_with(&value, EncodeOptions::zero_copy());
//! let back = decode(wire).unwrap();
//! assert_eq!(&back.get("Data").unwrap().as_binary().unwrap()[..], b"\x7fELF");
//! ```

pub mod constants;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod number;
pub mod value;
pub mod writers;

pub use constants::*;
pub use decoder::{decode, decode_sequence, decode_slice, DecodeOptions, Decoder};
pub use encoder::{encode, encode_sequence, encode_sequence_with, encode_with, EncodeOptions, Encoder};
pub use error::{CodecError, CodecResult};
pub use number::Number;
pub use value::{Value, ValueMap};
pub use writers::{ObjectWriters, Serializable};

// Re-exported so callers can build big integers without a direct dependency
pub use num_bigint::BigInt;
