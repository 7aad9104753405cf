use sha2::{Digest, Sha256};

/// SHA-256 of a firmware image, hex-encoded.
///
/// Handed to the engine with an install so it can tell whether the device
/// already holds the same image.
pub fn image_fingerprint(image: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image);
    hex::encode(hasher.finalize())
}
