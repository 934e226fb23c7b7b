//! Endpoint hashing for change detection.
//!
//! This module provides deterministic hashing of endpoints so unchanged
//! functions can be skipped between releases.

use sha2::{Digest, Sha256};

use crate::backend::{Backend, Endpoint, DEPLOYMENT_TOOL_LABEL, HASH_LABEL};

/// Bytes of the digest kept in a hash.
const HASH_BYTES: usize = 24;

/// Hasher for computing endpoint content hashes.
#[derive(Debug, Default)]
pub struct EndpointHasher;

impl EndpointHasher {
    /// Creates a new endpoint hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the hash of an endpoint and the sources it will run.
    ///
    /// Fields written back by the control plane (`uri`, `hash`) and the labels
    /// this tool adds itself do not contribute.
    #[must_use]
    pub fn hash_endpoint(&self, endpoint: &Endpoint, source_digest: Option<&str>) -> String {
        let mut normalized = endpoint.clone();
        normalized.uri = None;
        normalized.hash = None;
        normalized.labels.remove(DEPLOYMENT_TOOL_LABEL);
        normalized.labels.remove(HASH_LABEL);

        let mut hasher = Sha256::new();

        if let Some(digest) = source_digest {
            hasher.update(digest.as_bytes());
        }

        // Maps are ordered, so the encoding is stable.
        let encoded = serde_json::to_vec(&normalized)
            .unwrap_or_else(|_| format!("{normalized:?}").into_bytes());
        hasher.update(&encoded);

        // Stored as a label value, which is capped at 63 characters.
        hex::encode(&hasher.finalize()[..HASH_BYTES])
    }

    /// Sets the hash of every endpoint in a backend.
    pub fn apply_hashes(&self, backend: &mut Backend, source_digest: Option<&str>) {
        for endpoint in backend.all_endpoints_mut() {
            endpoint.hash = Some(self.hash_endpoint(endpoint, source_digest));
        }
    }
}
