use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use echolock_core::{EchoLockError, SHARE_WRAP_MAX_PAYLOAD, SHARE_WRAP_MIN_PAYLOAD, SHARE_WRAP_VERSION};
use echolock_crypto::ct_eq;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroize;

/// Subkeys derived from a single HKDF expand, split by purpose.
struct WrapKeys {
    cipher_key: [u8; 32],
    mac_key: [u8; 32],
}

impl Drop for WrapKeys {
    fn drop(&mut self) {
        self.cipher_key.zeroize();
        self.mac_key.zeroize();
    }
}

fn derive_wrap_keys(shared_x: &[u8; 32], nonce: &[u8; 32]) -> WrapKeys {
    let salt = [0u8; 32];
    let hk = Hkdf::<Sha256>::new(Some(&salt), shared_x);
    let mut okm = [0u8; 64];
    hk.expand_multi_info(&[echolock_core::SHARE_WRAP_INFO, nonce], &mut okm)
        .expect("64 is a valid sha256 HKDF output length");
    let mut cipher_key = [0u8; 32];
    let mut mac_key = [0u8; 32];
    cipher_key.copy_from_slice(&okm[..32]);
    mac_key.copy_from_slice(&okm[32..]);
    okm.zeroize();
    WrapKeys { cipher_key, mac_key }
}

/// Wrap `plaintext` (the canonical serialisation of a threshold share)
/// for a single guardian under the ECDH shared-x `shared_x`. Returns
/// `(nonce, ciphertext, mac)`.
pub fn wrap(
    shared_x: &[u8; 32],
    plaintext: &[u8],
) -> Result<([u8; 32], Vec<u8>, [u8; 32]), EchoLockError> {
    if plaintext.len() < SHARE_WRAP_MIN_PAYLOAD || plaintext.len() > SHARE_WRAP_MAX_PAYLOAD {
        return Err(EchoLockError::SizeLimit(format!(
            "share payload length {} outside [{SHARE_WRAP_MIN_PAYLOAD}, {SHARE_WRAP_MAX_PAYLOAD}]",
            plaintext.len()
        )));
    }
    use rand::RngCore;
    let mut nonce = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut nonce);

    let keys = derive_wrap_keys(shared_x, &nonce);
    let mut ciphertext = plaintext.to_vec();
    let zero_iv = [0u8; 12];
    let mut cipher = ChaCha20::new((&keys.cipher_key).into(), (&zero_iv).into());
    cipher.apply_keystream(&mut ciphertext);

    let mut mac_input = Vec::with_capacity(32 + ciphertext.len());
    mac_input.extend_from_slice(&nonce);
    mac_input.extend_from_slice(&ciphertext);
    let mut mac_engine =
        Hmac::<Sha256>::new_from_slice(&keys.mac_key).expect("hmac accepts any key length");
    mac_engine.update(&mac_input);
    let mac_bytes = mac_engine.finalize().into_bytes();
    let mut mac = [0u8; 32];
    mac.copy_from_slice(&mac_bytes);

    Ok((nonce, ciphertext, mac))
}

/// Unwrap a share previously wrapped with `wrap`. Rejects any `version`
/// other than 2 and fails with `AeadAuthFailure` on a MAC mismatch,
/// never yielding a decryption oracle: the MAC is checked in constant
/// time before the stream cipher runs.
pub fn unwrap(
    shared_x: &[u8; 32],
    version: u8,
    nonce: &[u8; 32],
    ciphertext: &[u8],
    mac: &[u8; 32],
) -> Result<Vec<u8>, EchoLockError> {
    if version != SHARE_WRAP_VERSION {
        return Err(EchoLockError::ParameterError(format!(
            "unsupported wrapped-share version {version}"
        )));
    }

    let keys = derive_wrap_keys(shared_x, nonce);
    let mut mac_input = Vec::with_capacity(32 + ciphertext.len());
    mac_input.extend_from_slice(nonce);
    mac_input.extend_from_slice(ciphertext);
    let mut mac_engine =
        Hmac::<Sha256>::new_from_slice(&keys.mac_key).expect("hmac accepts any key length");
    mac_engine.update(&mac_input);
    let expected = mac_engine.finalize().into_bytes();

    if !ct_eq(&expected, mac) {
        return Err(EchoLockError::AeadAuthFailure);
    }

    let mut plaintext = ciphertext.to_vec();
    let zero_iv = [0u8; 12];
    let mut cipher = ChaCha20::new((&keys.cipher_key).into(), (&zero_iv).into());
    cipher.apply_keystream(&mut plaintext);
    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_unwrap_round_trip() {
        let shared_x = [7u8; 32];
        let (nonce, ciphertext, mac) = wrap(&shared_x, b"share-bytes").unwrap();
        let plaintext = unwrap(&shared_x, 2, &nonce, &ciphertext, &mac).unwrap();
        assert_eq!(plaintext, b"share-bytes");
    }

    #[test]
    fn wrong_recipient_key_fails_with_mac_error_not_garbage() {
        let shared_x = [7u8; 32];
        let wrong = [9u8; 32];
        let (nonce, ciphertext, mac) = wrap(&shared_x, b"share-bytes").unwrap();
        let err = unwrap(&wrong, 2, &nonce, &ciphertext, &mac).unwrap_err();
        assert!(matches!(err, EchoLockError::AeadAuthFailure));
    }

    #[test]
    fn rejects_bad_version() {
        let shared_x = [7u8; 32];
        let (nonce, ciphertext, mac) = wrap(&shared_x, b"share-bytes").unwrap();
        assert!(unwrap(&shared_x, 3, &nonce, &ciphertext, &mac).is_err());
    }
}
