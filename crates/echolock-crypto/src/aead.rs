use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use echolock_core::{EchoLockError, AEAD_IV_LEN, AEAD_KEY_LEN, AEAD_TAG_LEN};
use zeroize::Zeroize;

/// AEAD-encrypt `plaintext` under `key` with the given 96-bit `iv` and
/// associated data. Returns `ciphertext || tag` (tag is the trailing
/// 16 bytes, matching the `chacha20poly1305` crate's append convention).
pub fn encrypt(
    key: &[u8; AEAD_KEY_LEN],
    iv: &[u8; AEAD_IV_LEN],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, EchoLockError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce = Nonce::from_slice(iv);
    cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|_| EchoLockError::AeadAuthFailure)
}

/// AEAD-decrypt `ciphertext` (with trailing 16-byte tag) under `key`.
/// `aad` must be byte-identical to the value used at encryption time.
/// Fails with `AeadAuthFailure` on any tag mismatch; never returns
/// partial plaintext.
pub fn decrypt(
    key: &[u8; AEAD_KEY_LEN],
    iv: &[u8; AEAD_IV_LEN],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, EchoLockError> {
    if ciphertext.len() < AEAD_TAG_LEN {
        return Err(EchoLockError::AeadAuthFailure);
    }
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce = Nonce::from_slice(iv);
    cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| EchoLockError::AeadAuthFailure)
}

/// Draw a fresh random 256-bit symmetric key.
pub fn generate_key() -> [u8; AEAD_KEY_LEN] {
    use rand::RngCore;
    let mut key = [0u8; AEAD_KEY_LEN];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

/// Draw a fresh random 96-bit iv.
pub fn generate_iv() -> [u8; AEAD_IV_LEN] {
    use rand::RngCore;
    let mut iv = [0u8; AEAD_IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);
    iv
}

/// Wipe a key buffer in place. Callers are responsible for calling this
/// on every exit path, including failure, once the key is no longer needed.
pub fn wipe_key(key: &mut [u8; AEAD_KEY_LEN]) {
    key.zeroize();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let key = generate_key();
        let iv = generate_iv();
        let aad = b"switch-envelope";
        let ct = encrypt(&key, &iv, aad, b"hello").unwrap();
        let pt = decrypt(&key, &iv, aad, &ct).unwrap();
        assert_eq!(pt, b"hello");
    }

    #[test]
    fn wrong_key_fails_with_auth_failure() {
        let key = generate_key();
        let other = generate_key();
        let iv = generate_iv();
        let ct = encrypt(&key, &iv, b"", b"hello").unwrap();
        let err = decrypt(&other, &iv, b"", &ct).unwrap_err();
        assert!(matches!(err, EchoLockError::AeadAuthFailure));
    }

    #[test]
    fn mismatched_aad_fails() {
        let key = generate_key();
        let iv = generate_iv();
        let ct = encrypt(&key, &iv, b"aad-a", b"hello").unwrap();
        assert!(decrypt(&key, &iv, b"aad-b", &ct).is_err());
    }
}
