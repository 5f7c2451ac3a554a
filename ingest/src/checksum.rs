use sha2::{Digest, Sha256};

use crate::IngestError;

/// The digest primitive is resolved once, from configuration, at service
/// construction. An unrecognized name is a fatal misconfiguration, not a
/// per-request error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha256,
}

impl DigestAlgorithm {
    pub fn resolve(name: &str) -> Result<Self, IngestError> {
        match name.to_ascii_lowercase().as_str() {
            "sha-256" | "sha256" => Ok(DigestAlgorithm::Sha256),
            _ => Err(IngestError::AlgorithmUnavailable(name.to_string())),
        }
    }
}

/// Incremental checksum state. Feeding chunks in order produces the same
/// digest as a single update over their concatenation.
pub struct Checksum {
    hasher: Sha256,
}

impl Checksum {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Sha256 => Self {
                hasher: Sha256::new(),
            },
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Lowercase hex, 2x the digest width (64 chars for SHA-256).
    pub fn finalize(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}
