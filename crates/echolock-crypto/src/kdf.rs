use echolock_core::{EchoLockError, KDF_MIN_SALT_LEN, KDF_OUTPUT_LEN};
use hmac::Hmac;
use sha2::Sha256;

/// PBKDF2-HMAC-SHA256 parameters persisted alongside a password-wrapped key.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct KdfParams {
    pub salt: Vec<u8>,
    pub iterations: u32,
}

/// Derive a 256-bit key from `password` and `params`. Deterministic: the
/// same `(password, params)` always yields the same key. Rejects salts
/// shorter than the documented minimum and iteration counts below `min_iterations`.
pub fn derive_key(
    password: &[u8],
    params: &KdfParams,
    min_iterations: u32,
) -> Result<[u8; KDF_OUTPUT_LEN], EchoLockError> {
    if params.salt.len() < KDF_MIN_SALT_LEN {
        return Err(EchoLockError::ParameterError(format!(
            "kdf salt too short: need >= {KDF_MIN_SALT_LEN} bytes, got {}",
            params.salt.len()
        )));
    }
    if params.iterations < min_iterations {
        return Err(EchoLockError::ParameterError(format!(
            "kdf iterations too low: need >= {min_iterations}, got {}",
            params.iterations
        )));
    }
    let mut out = [0u8; KDF_OUTPUT_LEN];
    pbkdf2::pbkdf2::<Hmac<Sha256>>(password, &params.salt, params.iterations, &mut out)
        .map_err(|_| EchoLockError::ParameterError("pbkdf2 output length invalid".into()))?;
    Ok(out)
}

/// Generate fresh KDF parameters using the given iteration count.
pub fn generate_params(iterations: u32) -> KdfParams {
    use rand::RngCore;
    let mut salt = vec![0u8; KDF_MIN_SALT_LEN * 2];
    rand::thread_rng().fill_bytes(&mut salt);
    KdfParams { salt, iterations }
}

#[cfg(test)]
mod tests {
    use super::*;
    use echolock_core::KDF_MIN_ITERATIONS_CURRENT;

    #[test]
    fn deterministic() {
        let params = generate_params(KDF_MIN_ITERATIONS_CURRENT);
        let a = derive_key(b"correct horse", &params, KDF_MIN_ITERATIONS_CURRENT).unwrap();
        let b = derive_key(b"correct horse", &params, KDF_MIN_ITERATIONS_CURRENT).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_low_iterations() {
        let params = KdfParams {
            salt: vec![0u8; 16],
            iterations: 10,
        };
        assert!(derive_key(b"pw", &params, KDF_MIN_ITERATIONS_CURRENT).is_err());
    }

    #[test]
    fn trailing_space_changes_key() {
        let params = generate_params(KDF_MIN_ITERATIONS_CURRENT);
        let a = derive_key(b"good", &params, KDF_MIN_ITERATIONS_CURRENT).unwrap();
        let b = derive_key(b"good ", &params, KDF_MIN_ITERATIONS_CURRENT).unwrap();
        assert_ne!(a, b);
    }
}
