use echolock_core::{EchoLockError, SchnorrSignature, XOnlyPublicKey};
use secp256k1::hashes::sha256;
use secp256k1::{Keypair, Message, Secp256k1, SecretKey};
use zeroize::Zeroize;

/// A secret scalar on the curve. Zeroised on drop.
pub struct SecretScalar([u8; 32]);

impl SecretScalar {
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (sk, _) = secp.generate_keypair(&mut rand::thread_rng());
        Self(sk.secret_bytes())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, EchoLockError> {
        SecretKey::from_slice(&bytes).map_err(|_| EchoLockError::CurveError)?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn secret_key(&self) -> SecretKey {
        SecretKey::from_slice(&self.0).expect("validated at construction")
    }
}

impl Drop for SecretScalar {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Derive the x-only public key (even-y lift) for `sk`.
pub fn derive_public(sk: &SecretScalar) -> XOnlyPublicKey {
    let secp = Secp256k1::new();
    let keypair = Keypair::from_secret_key(&secp, &sk.secret_key());
    let (xonly, _parity) = keypair.x_only_public_key();
    XOnlyPublicKey(xonly.serialize())
}

/// ECDH shared-x: the 32-byte x-coordinate of `sk * pk`, lifting `pk` to
/// its even-y point. `CurveError` if `pk` is not a valid lift.
pub fn ecdh_shared_x(sk: &SecretScalar, pk: &XOnlyPublicKey) -> Result<[u8; 32], EchoLockError> {
    let xonly =
        secp256k1::XOnlyPublicKey::from_slice(&pk.0).map_err(|_| EchoLockError::CurveError)?;
    let full = xonly.public_key(secp256k1::Parity::Even);
    let secret = SecretKey::from_slice(&sk.0).map_err(|_| EchoLockError::CurveError)?;
    let shared_point = secp256k1::ecdh::shared_secret_point(&full, &secret);
    let mut out = [0u8; 32];
    out.copy_from_slice(&shared_point[..32]);
    Ok(out)
}

/// Schnorr-sign the 32-byte digest `msg` (the caller has already hashed
/// whatever it is signing with sha256) under `sk`.
pub fn schnorr_sign(sk: &SecretScalar, msg: &[u8; 32]) -> SchnorrSignature {
    let secp = Secp256k1::new();
    let keypair = Keypair::from_secret_key(&secp, &sk.secret_key());
    let message = Message::from_digest(*msg);
    let sig = secp.sign_schnorr(&message, &keypair);
    SchnorrSignature(*sig.as_ref())
}

/// Verify a Schnorr signature over `msg` under the x-only key `pk`.
pub fn schnorr_verify(pk: &XOnlyPublicKey, msg: &[u8; 32], sig: &SchnorrSignature) -> bool {
    let secp = Secp256k1::new();
    let xonly = match secp256k1::XOnlyPublicKey::from_slice(&pk.0) {
        Ok(k) => k,
        Err(_) => return false,
    };
    let signature = match secp256k1::schnorr::Signature::from_slice(&sig.0) {
        Ok(s) => s,
        Err(_) => return false,
    };
    let message = Message::from_digest(*msg);
    secp.verify_schnorr(&signature, &message, &xonly).is_ok()
}

/// sha256 a byte string down to a 32-byte digest, the message format
/// `schnorr_sign`/`schnorr_verify` expect.
pub fn sha256_digest(data: &[u8]) -> [u8; 32] {
    use secp256k1::hashes::Hash;
    *sha256::Hash::hash(data).as_byte_array()
}
