//! Full local round-trip through the envelope builder, threshold
//! recombination, and AEAD decryption — no network or disk involved.

use echolock_core::XOnlyPublicKey;
use echolock_crypto::{derive_public, ecdh_shared_x, SecretScalar};
use echolock_envelope::{build, BuildParams};

struct Guardian {
    sk: SecretScalar,
    pk: XOnlyPublicKey,
}

fn guardians(n: u8) -> Vec<Guardian> {
    (0..n)
        .map(|_| {
            let sk = SecretScalar::generate();
            let pk = derive_public(&sk);
            Guardian { sk, pk }
        })
        .collect()
}

fn decrypt_share(guardian: &Guardian, encrypted: &echolock_envelope::EncryptedShare) -> echolock_crypto::Share {
    let shared_x = ecdh_shared_x(&guardian.sk, &encrypted.ephemeral_pubkey).unwrap();
    let plaintext = echolock_envelope::wrap::unwrap(
        &shared_x,
        encrypted.version,
        &encrypted.nonce,
        &encrypted.ciphertext,
        &encrypted.mac,
    )
    .unwrap();
    serde_json::from_slice(&plaintext).unwrap()
}

#[test]
fn local_round_trip_with_k_of_n_shares() {
    let owner = SecretScalar::generate();
    let owner_pubkey = derive_public(&owner);
    let guardian_set = guardians(5);
    let guardian_pubkeys: Vec<XOnlyPublicKey> = guardian_set.iter().map(|g| g.pk).collect();

    let params = BuildParams {
        owner_pubkey,
        created_at: 1_700_000_000,
        k: 3,
        n: 5,
        recipients: vec![],
        guardians: guardian_pubkeys,
        check_in_seconds: 86_400,
        aad: b"switch-envelope".to_vec(),
    };

    let transcript = build(b"hello", &params).unwrap();
    assert_eq!(transcript.encrypted_shares.len(), 5);

    let recovered_shares: Vec<echolock_crypto::Share> = guardian_set
        .iter()
        .zip(transcript.encrypted_shares.iter())
        .take(3)
        .map(|(g, e)| decrypt_share(g, e))
        .collect();

    let key_bytes = echolock_crypto::combine(&recovered_shares).unwrap();
    let mut key = [0u8; echolock_core::AEAD_KEY_LEN];
    key.copy_from_slice(&key_bytes);

    let mut ciphertext_with_tag = transcript.envelope.ciphertext.clone();
    ciphertext_with_tag.extend_from_slice(&transcript.envelope.tag);
    let plaintext =
        echolock_crypto::decrypt(&key, &transcript.envelope.iv, b"switch-envelope", &ciphertext_with_tag)
            .unwrap();

    assert_eq!(plaintext, b"hello");
}

#[test]
fn corrupted_share_fails_integrity_but_other_k_still_recover() {
    let owner = SecretScalar::generate();
    let owner_pubkey = derive_public(&owner);
    let guardian_set = guardians(5);
    let guardian_pubkeys: Vec<XOnlyPublicKey> = guardian_set.iter().map(|g| g.pk).collect();

    let params = BuildParams {
        owner_pubkey,
        created_at: 1_700_000_000,
        k: 3,
        n: 5,
        recipients: vec![],
        guardians: guardian_pubkeys,
        check_in_seconds: 86_400,
        aad: b"switch-envelope".to_vec(),
    };
    let transcript = build(b"hello", &params).unwrap();

    let mut shares: Vec<echolock_crypto::Share> = guardian_set
        .iter()
        .zip(transcript.encrypted_shares.iter())
        .map(|(g, e)| decrypt_share(g, e))
        .collect();

    shares[0].integrity_tag[0] ^= 0xff;
    let err = echolock_crypto::combine(&shares[0..3]).unwrap_err();
    assert!(matches!(err, echolock_core::EchoLockError::IntegrityFailure));

    let recovered = echolock_crypto::combine(&shares[2..5]).unwrap();
    assert_eq!(recovered.len(), echolock_core::AEAD_KEY_LEN);
}
