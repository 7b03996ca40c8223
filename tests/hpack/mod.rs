//! Integration tests for the HPACK wrapper and header conversions

mod decoding;
mod encoding;
