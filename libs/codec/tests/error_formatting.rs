//! Error reporting quality for malformed input
//!
//! Decode errors are shown to developers while debugging a misbehaving
//! peer, so each one must name the failing byte and quote the input just
//! before it.

use codec::{decode, decode_sequence, CodecError, Value, CONTEXT_WINDOW};

#[test]
fn test_malformed_message_names_offset_and_context() {
    let err = decode(r#"{"a":}"#).unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with("Malformed input at byte 5"), "{message}");
    assert!(message.contains(r#"{\"a\":}"#), "{message}");
}

#[test]
fn test_unexpected_end_distinct_from_malformed() {
    assert!(matches!(decode("[1, 2").unwrap_err(), CodecError::UnexpectedEnd { .. }));
    assert!(matches!(decode("tru").unwrap_err(), CodecError::UnexpectedEnd { .. }));
    assert!(matches!(decode("trux").unwrap_err(), CodecError::Malformed { .. }));
}

#[test]
fn test_context_is_bounded_for_large_inputs() {
    let mut input = String::from("[");
    for i in 0..10_000 {
        input.push_str(&i.to_string());
        input.push(',');
    }
    input.push('}');

    let err = decode(input).unwrap_err();
    let context = err.context().unwrap();
    assert!(context.len() <= CONTEXT_WINDOW);
    assert!(context.ends_with('}'));
}

#[test]
fn test_control_characters_replaced_in_context() {
    let err = decode_sequence(&b"1\0{\x01\x02}"[..]).unwrap_err();
    let context = err.context().unwrap();
    assert!(!context.chars().any(|c| c.is_control()), "{context:?}");
}

#[test]
fn test_binary_truncation_reports_sizes() {
    let err = decode(&b"(10)\x01abc"[..]).unwrap_err();
    match err {
        CodecError::BinaryTruncated { declared, available, .. } => {
            assert_eq!(declared, 10);
            assert_eq!(available, 3);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_type_mismatch_message() {
    let err = Value::from(true).to_byte_array().unwrap_err();
    assert_eq!(err.to_string(), "Type mismatch: expected binary, got bool");
    assert!(!err.is_decode_error());
}
