use echolock_core::XOnlyPublicKey;
use serde::{Deserialize, Serialize};

/// The ciphertext bundle. Immutable once built.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u8,
    pub algorithm_id: u8,
    pub iv: [u8; 12],
    pub tag: [u8; 16],
    pub ciphertext: Vec<u8>,
}

/// Wire format version for `Envelope`.
pub const ENVELOPE_VERSION: u8 = 1;

/// Algorithm identifier for ChaCha20-Poly1305.
pub const ALGORITHM_CHACHA20_POLY1305: u8 = 1;

/// A share of the symmetric key wrapped under a single guardian's public
/// key via ECDH + HKDF-derived stream cipher + MAC.
///
/// Wire layout of the opaque payload is `[version:1 | nonce:32 |
/// ciphertext | mac:32]`; `version` must equal 2 and readers reject any
/// other value.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncryptedShare {
    pub guardian_pubkey: XOnlyPublicKey,
    /// The per-build ephemeral public key the guardian must use (with
    /// its own secret key) to recompute the same ECDH shared-x the
    /// builder used to wrap this share.
    pub ephemeral_pubkey: XOnlyPublicKey,
    pub share_index: u8,
    pub k: u8,
    pub n: u8,
    pub version: u8,
    pub nonce: [u8; 32],
    pub ciphertext: Vec<u8>,
    pub mac: [u8; 32],
}

/// Parameters controlling envelope construction.
#[derive(Clone, Debug)]
pub struct BuildParams {
    pub owner_pubkey: XOnlyPublicKey,
    pub created_at: i64,
    pub k: u8,
    pub n: u8,
    pub recipients: Vec<XOnlyPublicKey>,
    pub guardians: Vec<XOnlyPublicKey>,
    pub check_in_seconds: i64,
    pub aad: Vec<u8>,
}

/// The builder's transcript: everything a caller needs to persist and
/// distribute after a successful `build`.
#[derive(Clone, Debug)]
pub struct BuildTranscript {
    pub envelope: Envelope,
    pub encrypted_shares: Vec<EncryptedShare>,
    pub switch_id_seed: [u8; 16],
    pub owner_created_at: i64,
}
