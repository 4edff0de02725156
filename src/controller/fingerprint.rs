//! Spec content fingerprinting.
//!
//! The fingerprint names the migration Job, so any admitted spec edit yields
//! a new Job while an unchanged spec always maps back to the same one.
//! Collisions are tolerable: safety rests on the owner UID plus fingerprint
//! pair, not on hash uniqueness.

use sha2::{Digest, Sha256};

use crate::crd::DBUpgradeSpec;

/// Length of the fingerprint in hex characters.
pub const FINGERPRINT_LEN: usize = 8;

/// Stable content hash of a spec: the first 8 hex characters of SHA-256
/// over its canonical JSON serialization.
pub fn spec_fingerprint(spec: &DBUpgradeSpec) -> String {
    let bytes = serde_json::to_vec(spec).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    hex::encode(digest)[..FINGERPRINT_LEN].to_string()
}
