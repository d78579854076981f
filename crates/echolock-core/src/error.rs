use thiserror::Error;

#[derive(Debug, Error)]
pub enum EchoLockError {
    // ── Crypto primitives (C1) ───────────────────────────────────────────────
    #[error("AEAD authentication failed")]
    AeadAuthFailure,

    #[error("integrity tag mismatch")]
    IntegrityFailure,

    #[error("signature verification failed")]
    SignatureFailure,

    #[error("insufficient shares: need {need}, got {got}")]
    InsufficientShares { need: u8, got: u8 },

    #[error("shares carry inconsistent (k,n) parameters")]
    InconsistentShares,

    #[error("invalid curve point or key")]
    CurveError,

    #[error("random number generator failure")]
    RngFailure,

    // ── Envelope builder (C2) ────────────────────────────────────────────────
    #[error("invalid parameters: {0}")]
    ParameterError(String),

    #[error("size limit exceeded: {0}")]
    SizeLimit(String),

    // ── Relay transport (C3) ─────────────────────────────────────────────────
    #[error("relay unreachable: {0}")]
    RelayUnreachable(String),

    #[error("relay rejected event: {0}")]
    RelayRejected(String),

    #[error("quorum not met: need {need}, got {got}")]
    QuorumNotMet { need: usize, got: usize },

    // ── Switch coordinator (C4) ──────────────────────────────────────────────
    #[error("invalid state transition from {from}")]
    InvalidStateTransition { from: String },

    #[error("switch not found: {0}")]
    SwitchNotFound(String),

    // ── Timelock commitment (C6) ─────────────────────────────────────────────
    #[error("timelock not yet valid: current height {current}, locktime {locktime}")]
    TimelockNotValid { current: u32, locktime: u32 },

    #[error("chain unreachable: {0}")]
    ChainUnreachable(String),

    #[error("password rejected: {0}")]
    WeakPassword(String),

    #[error("script construction failed: {0}")]
    ScriptConstructionError(String),

    #[error("no spendable utxos at address")]
    NoUtxos,

    #[error("insufficient value to cover fee plus dust limit")]
    InsufficientValue,

    // ── System-level ─────────────────────────────────────────────────────────
    #[error("io error: {0}")]
    Io(String),

    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for EchoLockError {
    fn from(e: std::io::Error) -> Self {
        EchoLockError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for EchoLockError {
    fn from(e: serde_json::Error) -> Self {
        EchoLockError::Other(format!("serialization error: {e}"))
    }
}
