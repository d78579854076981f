/// Compute BLAKE3 hash of arbitrary bytes → 32-byte array.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Derive a switch-id seed from `(owner-pubkey, creation-time, envelope-iv)`
/// as described for the envelope builder.
pub fn switch_id_seed(owner_pubkey: &[u8], created_at: i64, iv: &[u8]) -> [u8; 16] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(owner_pubkey);
    hasher.update(&created_at.to_be_bytes());
    hasher.update(iv);
    let digest = hasher.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest.as_bytes()[..16]);
    out
}
