use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::key::{PrivateKey, PublicKey};
use bitcoin::opcodes::all::{OP_CHECKLOCKTIMEVERIFY, OP_CHECKSIG, OP_DROP};
use bitcoin::script::{Builder, ScriptBuf};
use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{
    transaction, Address, Amount, Network, OutPoint, Sequence, Transaction, TxIn, TxOut, Witness,
};
use echolock_core::{
    EchoLockError, AEAD_IV_LEN, AEAD_TAG_LEN, AVG_BLOCK_TIME_SECS, DUST_LIMIT_SATS,
    KDF_MIN_ITERATIONS_CURRENT, TIMELOCK_MATURITY_BLOCKS,
};
use echolock_crypto::KdfParams;
use serde::{Deserialize, Serialize};

use crate::chain::Chain;

/// A password-KDF-wrapped signing key. Never persisted or transmitted
/// unwrapped; the wrapped form is what `TimelockCommitment` carries.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WrappedKey {
    pub kdf_params: KdfParams,
    pub iv: [u8; AEAD_IV_LEN],
    pub tag: [u8; AEAD_TAG_LEN],
    pub ciphertext: Vec<u8>,
}

/// A CLTV-locked P2WSH commitment: `<locktime> OP_CHECKLOCKTIMEVERIFY
/// OP_DROP <pubkey> OP_CHECKSIG`. The signing key that can spend it is
/// generated by `build` and never leaves this process unwrapped.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimelockCommitment {
    #[serde(with = "script_hex")]
    pub script: ScriptBuf,
    pub address_str: String,
    pub locktime_height: u32,
    pub wrapped_signing_key: WrappedKey,
}

/// Current status of a commitment relative to the chain tip.
#[derive(Clone, Debug, Serialize)]
pub struct TimelockStatus {
    pub locktime_height: u32,
    pub current_height: u64,
    pub blocks_remaining: i64,
    pub is_valid: bool,
}

pub struct TimelockParams {
    pub check_in_seconds: i64,
    pub password: String,
    pub network: Network,
}

mod script_hex {
    use bitcoin::script::ScriptBuf;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(s: &ScriptBuf, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&hex::encode(s.as_bytes()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<ScriptBuf, D::Error> {
        let s = String::deserialize(de)?;
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        Ok(ScriptBuf::from_bytes(bytes))
    }
}

impl TimelockCommitment {
    pub fn address(&self, network: Network) -> Result<Address, EchoLockError> {
        self.address_str
            .parse::<Address<bitcoin::address::NetworkUnchecked>>()
            .map_err(|e| EchoLockError::ScriptConstructionError(e.to_string()))?
            .require_network(network)
            .map_err(|e| EchoLockError::ScriptConstructionError(e.to_string()))
    }
}

fn checked_height_delta(check_in_seconds: i64) -> Result<u32, EchoLockError> {
    if check_in_seconds <= 0 {
        return Err(EchoLockError::ParameterError(
            "check_in_seconds must be positive".into(),
        ));
    }
    let blocks = (check_in_seconds + AVG_BLOCK_TIME_SECS - 1) / AVG_BLOCK_TIME_SECS;
    u32::try_from(blocks)
        .map_err(|_| EchoLockError::ParameterError("check_in_seconds overflows block count".into()))
}

fn build_script(locktime_height: u32, pubkey: &PublicKey) -> ScriptBuf {
    Builder::new()
        .push_int(locktime_height as i64)
        .push_opcode(OP_CHECKLOCKTIMEVERIFY)
        .push_opcode(OP_DROP)
        .push_key(pubkey)
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

/// Build a fresh timelock commitment: generate a signing key, derive the
/// CLTV script and address from `chain`'s current tip, and wrap the key
/// under `params.password`.
pub async fn build(
    chain: &dyn Chain,
    params: &TimelockParams,
) -> Result<TimelockCommitment, EchoLockError> {
    if params.password.len() < 8 {
        return Err(EchoLockError::WeakPassword(
            "password must be at least 8 characters".into(),
        ));
    }

    let tip = chain.get_tip_height().await?;
    let delta = checked_height_delta(params.check_in_seconds)?;
    let locktime_height = u32::try_from(tip)
        .map_err(|_| EchoLockError::ChainUnreachable("tip height overflows u32".into()))?
        .checked_add(delta)
        .ok_or_else(|| EchoLockError::ParameterError("locktime height overflow".into()))?;

    let secp = Secp256k1::new();
    let mut secret_bytes = [0u8; 32];
    {
        use rand::RngCore;
        rand::thread_rng().fill_bytes(&mut secret_bytes);
    }
    let secret_key = SecretKey::from_slice(&secret_bytes)
        .map_err(|_| EchoLockError::ScriptConstructionError("bad generated secret key".into()))?;
    let private_key = PrivateKey::new(secret_key, params.network);
    let public_key = PublicKey::from_private_key(&secp, &private_key);

    let script = build_script(locktime_height, &public_key);
    let address = Address::p2wsh(&script, params.network);

    let kdf_params = echolock_crypto::generate_params(KDF_MIN_ITERATIONS_CURRENT);
    let aead_key = echolock_crypto::derive_key(
        params.password.as_bytes(),
        &kdf_params,
        KDF_MIN_ITERATIONS_CURRENT,
    )?;
    let iv = echolock_crypto::generate_iv();
    let wrapped = echolock_crypto::encrypt(&aead_key, &iv, b"timelock-signing-key", &secret_bytes)?;
    let mut aead_key = aead_key;
    echolock_crypto::wipe_key(&mut aead_key);
    {
        use zeroize::Zeroize;
        secret_bytes.zeroize();
    }

    let tag_at = wrapped.len() - AEAD_TAG_LEN;
    let mut tag = [0u8; AEAD_TAG_LEN];
    tag.copy_from_slice(&wrapped[tag_at..]);
    let ciphertext = wrapped[..tag_at].to_vec();

    Ok(TimelockCommitment {
        script,
        address_str: address.to_string(),
        locktime_height,
        wrapped_signing_key: WrappedKey {
            kdf_params,
            iv,
            tag,
            ciphertext,
        },
    })
}

/// Report whether `commitment`'s locktime has been reached. Does not
/// apply the spend maturity buffer; `spend` checks that separately.
pub async fn status(
    chain: &dyn Chain,
    commitment: &TimelockCommitment,
) -> Result<TimelockStatus, EchoLockError> {
    let current_height = chain.get_tip_height().await?;
    let locktime_height = commitment.locktime_height as u64;
    let blocks_remaining = locktime_height as i64 - current_height as i64;
    Ok(TimelockStatus {
        locktime_height: commitment.locktime_height,
        current_height,
        blocks_remaining,
        is_valid: current_height >= locktime_height,
    })
}

/// Unwrap the signing key, build and sign a transaction sweeping every
/// UTXO at the commitment address to `destination`, and return the
/// hex-serialized signed transaction. Never broadcasts; `dry_run` only
/// governs whether the return value is logged as a preview. The wrapped
/// key file is never rewritten, on any path, by this function.
pub async fn spend(
    chain: &dyn Chain,
    commitment: &TimelockCommitment,
    destination: &Address,
    network: Network,
    fee_rate_sats_per_vb: u64,
    password: &str,
    dry_run: bool,
) -> Result<String, EchoLockError> {
    let current_status = status(chain, commitment).await?;
    let maturity_height =
        commitment.locktime_height as u64 + TIMELOCK_MATURITY_BLOCKS as u64;
    if current_status.current_height < maturity_height {
        return Err(EchoLockError::TimelockNotValid {
            current: current_status.current_height as u32,
            locktime: commitment.locktime_height,
        });
    }

    let wrapped = &commitment.wrapped_signing_key;
    let aead_key = echolock_crypto::derive_key(
        password.as_bytes(),
        &wrapped.kdf_params,
        KDF_MIN_ITERATIONS_CURRENT,
    )?;
    let mut combined = wrapped.ciphertext.clone();
    combined.extend_from_slice(&wrapped.tag);
    let decrypt_result =
        echolock_crypto::decrypt(&aead_key, &wrapped.iv, b"timelock-signing-key", &combined);
    let mut aead_key = aead_key;
    echolock_crypto::wipe_key(&mut aead_key);
    let mut secret_bytes_vec = decrypt_result?;

    let secret_key = SecretKey::from_slice(&secret_bytes_vec)
        .map_err(|_| EchoLockError::AeadAuthFailure)?;
    {
        use zeroize::Zeroize;
        secret_bytes_vec.zeroize();
    }
    let secp = Secp256k1::new();
    let address = commitment.address(network)?;
    let utxos = chain.get_address_utxos(&address).await?;
    if utxos.is_empty() {
        return Err(EchoLockError::NoUtxos);
    }

    let total_value: u64 = utxos.iter().map(|u| u.value_sats).sum();
    const ESTIMATED_VSIZE: u64 = 180;
    let fee = fee_rate_sats_per_vb.saturating_mul(ESTIMATED_VSIZE);
    if total_value <= fee {
        return Err(EchoLockError::InsufficientValue);
    }
    let output_value = total_value - fee;
    if output_value < DUST_LIMIT_SATS {
        return Err(EchoLockError::InsufficientValue);
    }

    let inputs: Vec<TxIn> = utxos
        .iter()
        .map(|u| TxIn {
            previous_output: OutPoint::new(u.outpoint.txid, u.outpoint.vout),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_LOCKTIME_NO_RBF,
            witness: Witness::new(),
        })
        .collect();

    let mut tx = Transaction {
        version: transaction::Version::TWO,
        lock_time: LockTime::from_height(commitment.locktime_height)
            .map_err(|e| EchoLockError::ScriptConstructionError(e.to_string()))?,
        input: inputs,
        output: vec![TxOut {
            value: Amount::from_sat(output_value),
            script_pubkey: destination.script_pubkey(),
        }],
    };

    let prevouts: Vec<TxOut> = utxos
        .iter()
        .map(|u| TxOut {
            value: Amount::from_sat(u.value_sats),
            script_pubkey: commitment.script.to_p2wsh(),
        })
        .collect();

    let mut cache = SighashCache::new(tx.clone());
    for (idx, prevout) in prevouts.iter().enumerate() {
        let sighash = cache
            .p2wsh_signature_hash(
                idx,
                &commitment.script,
                prevout.value,
                EcdsaSighashType::All,
            )
            .map_err(|e| EchoLockError::ScriptConstructionError(e.to_string()))?;
        let message = Message::from_digest(sighash.to_byte_array());
        let signature = secp.sign_ecdsa(&message, &secret_key);
        let mut sig_bytes = signature.serialize_der().to_vec();
        sig_bytes.push(EcdsaSighashType::All as u8);

        let mut witness = Witness::new();
        witness.push(sig_bytes);
        witness.push(commitment.script.as_bytes());
        tx.input[idx].witness = witness;
    }

    let hex_tx = bitcoin::consensus::encode::serialize_hex(&tx);
    if dry_run {
        tracing::info!(target: "echolock_timelock", "dry-run spend (not broadcast)");
    }
    Ok(hex_tx)
}
