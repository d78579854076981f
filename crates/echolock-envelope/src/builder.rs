use echolock_core::{
    EchoLockError, AEAD_PLAINTEXT_CAP, MIN_PLAINTEXT_LEN, THRESHOLD_MAX_N, THRESHOLD_MIN_K,
};
use echolock_crypto::{ecdh_shared_x, encrypt, generate_iv, generate_key, wipe_key, SecretScalar};

use crate::types::{
    BuildParams, BuildTranscript, EncryptedShare, Envelope, ALGORITHM_CHACHA20_POLY1305,
    ENVELOPE_VERSION,
};
use crate::wrap::wrap;

/// Build an envelope + per-guardian encrypted shares from `plaintext`
/// and `params`. See module docs for the full failure-semantics table.
pub fn build(plaintext: &[u8], params: &BuildParams) -> Result<BuildTranscript, EchoLockError> {
    validate_params(plaintext, params)?;

    let mut key = generate_key();
    let iv = generate_iv();
    let ciphertext_with_tag = encrypt(&key, &iv, &params.aad, plaintext)?;
    let tag_offset = ciphertext_with_tag.len() - 16;
    let mut tag = [0u8; 16];
    tag.copy_from_slice(&ciphertext_with_tag[tag_offset..]);
    let ciphertext = ciphertext_with_tag[..tag_offset].to_vec();

    let envelope = Envelope {
        version: ENVELOPE_VERSION,
        algorithm_id: ALGORITHM_CHACHA20_POLY1305,
        iv,
        tag,
        ciphertext,
    };

    let shares = echolock_crypto::split(&key, params.k, params.n)?;

    let ephemeral = SecretScalar::generate();
    let ephemeral_pubkey = echolock_crypto::derive_public(&ephemeral);
    let mut encrypted_shares = Vec::with_capacity(params.guardians.len());
    for (guardian_pk, share) in params.guardians.iter().zip(shares.iter()) {
        let shared_x = ecdh_shared_x(&ephemeral, guardian_pk)?;
        let share_bytes =
            serde_json::to_vec(share).map_err(|e| EchoLockError::Other(e.to_string()))?;
        let (nonce, ciphertext, mac) = wrap(&shared_x, &share_bytes)?;
        encrypted_shares.push(EncryptedShare {
            guardian_pubkey: *guardian_pk,
            ephemeral_pubkey,
            share_index: share.index,
            k: params.k,
            n: params.n,
            version: echolock_core::SHARE_WRAP_VERSION,
            nonce,
            ciphertext,
            mac,
        });
    }
    drop(ephemeral);

    let switch_id_seed = echolock_crypto::switch_id_seed(
        &params.owner_pubkey.0,
        params.created_at,
        &envelope.iv,
    );

    wipe_key(&mut key);

    Ok(BuildTranscript {
        envelope,
        encrypted_shares,
        switch_id_seed,
        owner_created_at: params.created_at,
    })
}

fn validate_params(plaintext: &[u8], params: &BuildParams) -> Result<(), EchoLockError> {
    if params.k < THRESHOLD_MIN_K
        || params.k > params.n
        || params.n < 2
        || params.n > THRESHOLD_MAX_N
    {
        return Err(EchoLockError::ParameterError(format!(
            "invalid threshold parameters k={} n={}",
            params.k, params.n
        )));
    }
    if params.guardians.len() != params.n as usize {
        return Err(EchoLockError::ParameterError(format!(
            "guardian count {} must equal n={}",
            params.guardians.len(),
            params.n
        )));
    }
    if plaintext.len() < MIN_PLAINTEXT_LEN {
        return Err(EchoLockError::SizeLimit(
            "plaintext must not be empty".into(),
        ));
    }
    if plaintext.len() > AEAD_PLAINTEXT_CAP {
        return Err(EchoLockError::SizeLimit(format!(
            "plaintext exceeds AEAD cap of {AEAD_PLAINTEXT_CAP} bytes"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use echolock_core::XOnlyPublicKey;
    use echolock_crypto::derive_public;

    fn guardian_keys(n: u8) -> Vec<XOnlyPublicKey> {
        (0..n)
            .map(|_| derive_public(&SecretScalar::generate()))
            .collect()
    }

    #[test]
    fn build_produces_one_encrypted_share_per_guardian() {
        let owner = SecretScalar::generate();
        let params = BuildParams {
            owner_pubkey: derive_public(&owner),
            created_at: 1_000,
            k: 3,
            n: 5,
            recipients: guardian_keys(2),
            guardians: guardian_keys(5),
            check_in_seconds: 86_400,
            aad: b"switch-envelope".to_vec(),
        };
        let transcript = build(b"hello", &params).unwrap();
        assert_eq!(transcript.encrypted_shares.len(), 5);
    }

    #[test]
    fn rejects_guardian_count_mismatch() {
        let owner = SecretScalar::generate();
        let params = BuildParams {
            owner_pubkey: derive_public(&owner),
            created_at: 1_000,
            k: 3,
            n: 5,
            recipients: guardian_keys(2),
            guardians: guardian_keys(4),
            check_in_seconds: 86_400,
            aad: vec![],
        };
        assert!(build(b"hello", &params).is_err());
    }

    #[test]
    fn rejects_empty_plaintext() {
        let owner = SecretScalar::generate();
        let params = BuildParams {
            owner_pubkey: derive_public(&owner),
            created_at: 1_000,
            k: 2,
            n: 2,
            recipients: vec![],
            guardians: guardian_keys(2),
            check_in_seconds: 60,
            aad: vec![],
        };
        assert!(build(b"", &params).is_err());
    }
}
