//! Tests for HPACK decoding

use h2_mux::{error_code, Error, H2Header, HpackDecoder};

#[test]
fn test_decode_multiple_indexed_headers() {
    let mut decoder = HpackDecoder::new();

    // 0x82 = :method: GET, 0x86 = :scheme: http, 0x84 = :path: /
    let headers = decoder.decode(&[0x82, 0x86, 0x84]).unwrap();

    assert_eq!(
        headers,
        vec![
            H2Header::new(":method", "GET"),
            H2Header::new(":scheme", "http"),
            H2Header::new(":path", "/"),
        ]
    );
    assert!(headers.iter().all(H2Header::is_pseudo));
}

#[test]
fn test_decode_literal_with_indexing() {
    let mut decoder = HpackDecoder::new();
    let data = [
        0x40, // Literal with indexing, new name
        0x06, b'c', b'u', b's', b't', b'o', b'm',
        0x05, b'v', b'a', b'l', b'u', b'e',
    ];

    let headers = decoder.decode(&data).unwrap();
    assert_eq!(headers, vec![H2Header::new("custom", "value")]);

    // The field is now entry 62 of the dynamic table
    assert_eq!(decoder.decode(&[0xbe]).unwrap(), headers);
}

#[test]
fn test_decode_literal_indexed_name() {
    let mut decoder = HpackDecoder::new();
    let data = [
        0x41, // Literal with indexing, name index 1 (:authority)
        0x0B, b'e', b'x', b'a', b'm', b'p', b'l', b'e', b'.', b'c', b'o', b'm',
    ];

    let headers = decoder.decode(&data).unwrap();
    assert_eq!(headers, vec![H2Header::new(":authority", "example.com")]);
}

#[test]
fn test_decode_empty_block() {
    let mut decoder = HpackDecoder::new();
    assert!(decoder.decode(&[]).unwrap().is_empty());
}

#[test]
fn test_decode_unknown_index_is_compression_error() {
    let mut decoder = HpackDecoder::new();
    let err = decoder.decode(&[0xbe]).unwrap_err();

    assert!(matches!(err, Error::Compression(_)), "{err:?}");
    assert_eq!(err.error_code(), error_code::COMPRESSION_ERROR);
    assert!(err.is_connection_error());
}
