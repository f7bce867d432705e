//! Gzip content coding for RPC bodies
//!
//! The dispatch server compresses large responses for clients that admit
//! gzip; the outbound transport inflates gzip responses from the hub.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use samp_core::{CoreError, Result};
use std::io::{Read, Write};

/// Gzip-encode `data`.
pub fn gzip_encode(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| CoreError::Internal(format!("gzip write failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| CoreError::Internal(format!("gzip finish failed: {e}")))
}

/// Decode a gzip body; a corrupt stream is a protocol error.
pub fn gzip_decode(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| CoreError::Protocol(format!("gzip decompress failed: {e}")))?;
    Ok(decompressed)
}

/// Quality value an `Accept-Encoding` header assigns to `gzip`.
///
/// Only an explicit `gzip` coding counts; a missing `q` means 1.
pub fn gzip_quality(accept_encoding: &str) -> f32 {
    accept_encoding
        .split(',')
        .filter_map(|coding| {
            let mut parts = coding.split(';');
            let name = parts.next()?.trim();
            if !name.eq_ignore_ascii_case("gzip") {
                return None;
            }
            let quality = parts
                .filter_map(|param| param.trim().strip_prefix("q="))
                .next()
                .map(|q| q.trim().parse::<f32>().unwrap_or(0.0))
                .unwrap_or(1.0);
            Some(quality)
        })
        .next()
        .unwrap_or(0.0)
}

/// Whether a response of `len` bytes should be gzip-encoded.
pub fn should_compress(len: usize, threshold: Option<usize>, accept_encoding: Option<&str>) -> bool {
    match (threshold, accept_encoding) {
        (Some(threshold), Some(header)) => len > threshold && gzip_quality(header) > 0.0,
        _ => false,
    }
}
