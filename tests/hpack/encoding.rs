//! Tests for HPACK encoding and header map conversions

use h2_mux::hpack::{extend_header_map, find, from_header_map};
use h2_mux::{H2Header, HpackDecoder, HpackEncoder};
use http::HeaderMap;

#[test]
fn test_encode_indexed_header() {
    let mut encoder = HpackEncoder::new();
    // :method GET is entry 2 of the static table
    assert_eq!(encoder.encode(&[H2Header::new(":method", "GET")]), vec![0x82]);
}

#[test]
fn test_encode_decode_mixed_headers() {
    let mut encoder = HpackEncoder::new();
    let mut decoder = HpackDecoder::new();

    let headers = vec![
        H2Header::new(":status", "200"),
        H2Header::new("content-type", "application/json"),
        H2Header::new("x-request-id", "abc-123-def"),
        H2Header::new("set-cookie", "session=xyz"),
        H2Header::new("set-cookie", "theme=dark"),
    ];

    let encoded = encoder.encode(&headers);
    assert_eq!(decoder.decode(&encoded).unwrap(), headers);
}

#[test]
fn test_contexts_stay_in_step_over_many_blocks() {
    let mut encoder = HpackEncoder::new();
    let mut decoder = HpackDecoder::new();

    for i in 0..50 {
        let headers = vec![
            H2Header::new(":path", format!("/items/{}", i % 7)),
            H2Header::new("x-tenant", "acme"),
        ];
        let encoded = encoder.encode(&headers);
        assert_eq!(decoder.decode(&encoded).unwrap(), headers, "block {i}");
    }
}

#[test]
fn test_header_map_keeps_repeated_fields() {
    let fields = vec![
        H2Header::new(":path", "/"),
        H2Header::new("accept", "text/html"),
        H2Header::new("accept", "application/json"),
    ];
    let mut map = HeaderMap::new();
    extend_header_map(&mut map, &fields).unwrap();

    assert_eq!(map.len(), 2);
    assert!(map.get(":path").is_none());
    let back = from_header_map(&map);
    assert_eq!(back, fields[1..].to_vec());
    assert_eq!(find(&fields, "accept"), Some("text/html"));
}
