//! # Codec Integration Tests
//!
//! End-to-end behaviour of the public codec API:
//! - Round-trips for every value kind, including supplementary-plane text
//! - Zero-copy binary splicing and its base64 equivalent
//! - Number fidelity at the i32 / i64 / arbitrary precision boundaries
//! - Sequence framing and whole-document failure semantics

use codec::{
    decode, decode_sequence, encode, encode_sequence, encode_sequence_with, encode_with,
    BigInt, CodecError, EncodeOptions, Number, Value,
};

fn round_trip(value: &Value) -> Value {
    decode(encode(value)).unwrap()
}

#[test]
fn test_round_trip_nested_document() {
    let value = Value::map([
        ("ID", Value::from("P1.T3")),
        ("Stack", Value::list([Value::from(0x4000), Value::from(0x4010), Value::Null])),
        (
            "Flags",
            Value::map([("Suspended", Value::from(true)), ("Exited", Value::from(false))]),
        ),
        ("Ratio", Value::Number(Number::decimal(-1250, 3))),
        ("Empty", Value::list(Vec::<Value>::new())),
        ("NoMap", Value::map(Vec::<(String, Value)>::new())),
    ]);
    assert_eq!(round_trip(&value), value);
}

#[test]
fn test_round_trip_all_unicode_planes() {
    let text: String = [
        '\u{0}', '\u{1}', '\u{7f}', 'é', '\u{7ff}', '\u{800}', '\u{fffd}', '\u{ffff}',
        '\u{10000}', '😀', '\u{10ffff}', '"', '\\',
    ]
    .iter()
    .collect();
    let value = Value::from(text.clone());
    assert_eq!(round_trip(&value).as_str(), Some(text.as_str()));
}

#[test]
fn test_private_use_characters_survive() {
    // Private-use code points must not be confused with binary markers
    let text = "\u{e000}\u{f8ff}\u{f0000}(3)\u{1}";
    let value = Value::list([Value::from(text), Value::binary(&b"abc"[..])]);
    let decoded = decode(encode_with(&value, EncodeOptions::zero_copy())).unwrap();
    assert_eq!(decoded, value);
}

#[test]
fn test_zero_copy_round_trip() {
    let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    let value = Value::map([
        ("Addr", Value::from(0x8000_0000u64)),
        ("Data", Value::binary(payload.clone())),
        ("Tail", Value::binary(&b"\x00\x01\x00"[..])),
    ]);

    let zero_copy = encode_with(&value, EncodeOptions::zero_copy());
    let decoded = decode(zero_copy.clone()).unwrap();
    assert_eq!(&decoded.get("Data").unwrap().as_binary().unwrap()[..], &payload[..]);
    assert_eq!(decoded, value);

    // Raw payload is spliced, not re-encoded
    assert!(zero_copy.len() < payload.len() + 64);

    let textual = decode(encode(&value)).unwrap();
    let from_base64 = textual.get("Data").unwrap().to_byte_array().unwrap();
    assert_eq!(&from_base64[..], &payload[..]);
    assert!(textual.get("Data").unwrap().as_str().is_some());
}

#[test]
fn test_number_fidelity_at_boundaries() {
    let cases = [
        ("2147483647", Number::I32(i32::MAX)),
        ("-2147483648", Number::I32(i32::MIN)),
        ("2147483648", Number::I64(2_147_483_648)),
        ("-2147483649", Number::I64(-2_147_483_649)),
        ("9223372036854775807", Number::I64(i64::MAX)),
        ("-9223372036854775808", Number::I64(i64::MIN)),
    ];
    for (literal, expected) in cases {
        let decoded = decode(literal).unwrap();
        assert_eq!(decoded, Value::Number(expected.clone()), "{literal}");
        assert_eq!(&encode(&decoded)[..], literal.as_bytes());
    }

    for literal in [
        "9223372036854775808",
        "-9223372036854775809",
        "99999999999999999999999999",
    ] {
        let decoded = decode(literal).unwrap();
        let expected: BigInt = literal.parse().unwrap();
        assert_eq!(decoded, Value::Number(Number::Big(expected)), "{literal}");
        assert_eq!(&encode(&decoded)[..], literal.as_bytes());
    }
}

#[test]
fn test_decimals_keep_scale() {
    for literal in ["0.1", "1.50", "-0.000123", "6.02214076E23", "1e-9", "42E0"] {
        let decoded = decode(literal).unwrap();
        assert!(matches!(decoded.as_number(), Some(Number::Decimal { .. })), "{literal}");
        assert_eq!(round_trip(&decoded), decoded, "{literal}");
    }
    assert_eq!(decode("NaN").unwrap(), Value::Number(Number::NaN));
}

#[test]
fn test_sequence_preserves_order_and_nulls() {
    let values = vec![Value::from("first"), Value::Null, Value::from(3)];
    let bytes = encode_sequence(&values);
    assert_eq!(bytes.iter().filter(|&&b| b == 0).count(), 3);
    assert_eq!(decode_sequence(bytes).unwrap(), values);
}

#[test]
fn test_sequence_with_zero_copy_binary_containing_nul() {
    let values = vec![
        Value::binary(&b"\x00\x00\x00"[..]),
        Value::Null,
        Value::binary(&b""[..]),
    ];
    let bytes = encode_sequence_with(&values, EncodeOptions::zero_copy());
    assert_eq!(decode_sequence(bytes).unwrap(), values);
}

#[test]
fn test_malformed_document_never_partially_applied() {
    let err = decode(r#"{"a":}"#).unwrap_err();
    assert!(err.is_decode_error());
    assert!(err.context().unwrap().contains(r#""a":"#));

    let err = decode(r#"{"ok":1,"bad":[1,2,}"#).unwrap_err();
    assert!(matches!(err, CodecError::Malformed { .. }));
}

#[test]
fn test_sequence_failure_discards_earlier_documents() {
    let mut bytes = encode_sequence(&[Value::from(1), Value::from(2)]).to_vec();
    bytes.extend_from_slice(b"{\"x\"\0");
    assert!(decode_sequence(bytes).is_err());
}

#[test]
fn test_whitespace_tolerated_between_tokens() {
    let value = decode(" [ 1 ,\n\t2 ,\r\n { \"k\" : \"v\" } ] ").unwrap();
    assert_eq!(value.as_list().unwrap().len(), 3);
}
