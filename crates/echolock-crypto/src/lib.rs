pub mod aead;
pub mod ct_eq;
pub mod curve;
pub mod hash;
pub mod kdf;
pub mod threshold;

pub use aead::{decrypt, encrypt, generate_iv, generate_key, wipe_key};
pub use ct_eq::ct_eq;
pub use curve::{
    derive_public, ecdh_shared_x, schnorr_sign, schnorr_verify, sha256_digest, SecretScalar,
};
pub use hash::{blake3_hash, switch_id_seed};
pub use kdf::{derive_key, generate_params, KdfParams};
pub use threshold::{combine, split, Share};
