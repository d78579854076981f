use echolock_core::{EchoLockError, THRESHOLD_MAX_N, THRESHOLD_MIN_K};
use sharks::{Share as SharksShare, Sharks};

use crate::hash::blake3_hash;

/// One share of a split secret, carrying an integrity tag over its own
/// bytes. The `sharks` wire format has no authentication of its own, so
/// the tag here is what lets `combine` detect a corrupted share instead
/// of silently reconstructing the wrong key.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Share {
    pub index: u8,
    pub k: u8,
    pub n: u8,
    pub bytes: Vec<u8>,
    pub integrity_tag: [u8; 32],
}

impl Share {
    fn tag_input(k: u8, n: u8, bytes: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(bytes.len() + 2);
        buf.push(k);
        buf.push(n);
        buf.extend_from_slice(bytes);
        buf
    }

    fn verify(&self) -> bool {
        let expected = blake3_hash(&Self::tag_input(self.k, self.n, &self.bytes));
        expected == self.integrity_tag
    }
}

/// Split `secret` into `n` shares requiring `k` to reconstruct.
/// `2 <= k <= n <= 255`.
pub fn split(secret: &[u8], k: u8, n: u8) -> Result<Vec<Share>, EchoLockError> {
    if k < THRESHOLD_MIN_K || k > n || n < 2 || n > THRESHOLD_MAX_N {
        return Err(EchoLockError::ParameterError(format!(
            "invalid threshold parameters k={k}, n={n}"
        )));
    }
    let sharks = Sharks(k);
    let dealer = sharks.dealer(secret);
    let shares: Vec<Share> = dealer
        .take(n as usize)
        .map(|s| {
            let bytes = Vec::from(&s);
            let tag = blake3_hash(&Share::tag_input(k, n, &bytes));
            Share {
                index: bytes[0],
                k,
                n,
                bytes,
                integrity_tag: tag,
            }
        })
        .collect();
    Ok(shares)
}

/// Reconstruct the original secret from at least `k` shares of identical
/// `(k, n)` parameters. Fails with `InsufficientShares` on too few,
/// `InconsistentShares` on mismatched parameters, `IntegrityFailure` on
/// a corrupted share's tag.
pub fn combine(shares: &[Share]) -> Result<Vec<u8>, EchoLockError> {
    if shares.is_empty() {
        return Err(EchoLockError::InsufficientShares { need: 2, got: 0 });
    }
    let (k, n) = (shares[0].k, shares[0].n);
    for s in shares {
        if s.k != k || s.n != n {
            return Err(EchoLockError::InconsistentShares);
        }
        if !s.verify() {
            return Err(EchoLockError::IntegrityFailure);
        }
    }
    if (shares.len() as u8) < k {
        return Err(EchoLockError::InsufficientShares {
            need: k,
            got: shares.len() as u8,
        });
    }
    let sharks = Sharks(k);
    let parsed: Result<Vec<SharksShare>, _> = shares
        .iter()
        .take(k as usize)
        .map(|s| SharksShare::try_from(s.bytes.as_slice()))
        .collect();
    let parsed = parsed.map_err(|_| EchoLockError::IntegrityFailure)?;
    sharks
        .recover(parsed.as_slice())
        .map_err(|_| EchoLockError::IntegrityFailure)
}
