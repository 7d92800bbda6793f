//! Content hashing and snapshot encoding

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};

/// Hex-encoded SHA-256 digest of raw page bytes
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Gzip-compresses raw page bytes for archiving
pub fn gzip_bytes(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

/// Restores bytes produced by [`gzip_bytes`]
pub fn gunzip_bytes(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let html = b"<html><body>Book</body></html>";
        assert_eq!(content_hash(html), content_hash(html));
        assert_eq!(content_hash(html).len(), 64);
    }

    #[test]
    fn test_hash_changes_with_content() {
        assert_ne!(
            content_hash(b"<p>price 10.00</p>"),
            content_hash(b"<p>price 12.00</p>")
        );
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            content_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_gzip_restores_original() {
        let html = "<html>".repeat(200);
        let compressed = gzip_bytes(html.as_bytes()).unwrap();
        assert!(compressed.len() < html.len());
        assert_eq!(gunzip_bytes(&compressed).unwrap(), html.as_bytes());
    }

    #[test]
    fn test_gunzip_rejects_garbage() {
        assert!(gunzip_bytes(b"definitely not gzip").is_err());
    }
}
