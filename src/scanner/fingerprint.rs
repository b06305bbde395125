//! SHA-256 content fingerprints computed in bounded chunks.

#![allow(missing_docs)]

use std::io::{self, Read};

use sha2::{Digest, Sha256};

use crate::core::cancel::CancellationToken;

/// Outcome of streaming one file through the hasher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashOutcome {
    Complete {
        fingerprint: String,
        bytes: u64,
        /// Leading bytes captured for content probes.
        head: Vec<u8>,
    },
    Cancelled,
}

/// Hash `reader` in `chunk_bytes` chunks, checking `token` between chunks.
///
/// Up to `head_limit` leading bytes are kept for content probes.
pub fn hash_stream(
    reader: &mut dyn Read,
    chunk_bytes: usize,
    head_limit: usize,
    token: &CancellationToken,
) -> io::Result<HashOutcome> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; chunk_bytes.max(1)];
    let mut head = Vec::with_capacity(head_limit.min(chunk_bytes));
    let mut total: u64 = 0;

    loop {
        if token.is_cancelled() {
            return Ok(HashOutcome::Cancelled);
        }
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        hasher.update(&buf[..n]);
        if head.len() < head_limit {
            let take = (head_limit - head.len()).min(n);
            head.extend_from_slice(&buf[..take]);
        }
        total += n as u64;
    }

    Ok(HashOutcome::Complete {
        fingerprint: hex_encode(&hasher.finalize()),
        bytes: total,
        head,
    })
}

/// Fingerprint of an in-memory buffer.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex_encode(&Sha256::digest(bytes))
}

/// Incremental hasher for data produced piecewise (backup verification).
#[derive(Default)]
pub struct Fingerprinter {
    hasher: Sha256,
}

impl Fingerprinter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    #[must_use]
    pub fn finish(self) -> String {
        hex_encode(&self.hasher.finalize())
    }
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
            let _ = write!(s, "{b:02x}");
            s
        })
}
