//! ─── EchoLock Protocol Constants ────────────────────────────────────────────

// ── AEAD (C1) ────────────────────────────────────────────────────────────────

/// Symmetric key size in bytes (256 bit).
pub const AEAD_KEY_LEN: usize = 32;

/// IV size in bytes (96 bit).
pub const AEAD_IV_LEN: usize = 12;

/// Authentication tag size in bytes (128 bit).
pub const AEAD_TAG_LEN: usize = 16;

/// Maximum plaintext accepted by the envelope builder (2 GiB).
pub const AEAD_PLAINTEXT_CAP: usize = 2 * 1024 * 1024 * 1024;

// ── Password KDF (C1) ────────────────────────────────────────────────────────

/// Minimum PBKDF2 iteration count for legacy (pre-existing) payloads.
pub const KDF_MIN_ITERATIONS_LEGACY: u32 = 100_000;

/// Minimum PBKDF2 iteration count required for newly created payloads.
pub const KDF_MIN_ITERATIONS_CURRENT: u32 = 600_000;

/// Minimum salt size in bytes (128 bit).
pub const KDF_MIN_SALT_LEN: usize = 16;

/// Derived key size in bytes (256 bit).
pub const KDF_OUTPUT_LEN: usize = 32;

// ── Threshold secret sharing (C1) ────────────────────────────────────────────

/// Minimum threshold k.
pub const THRESHOLD_MIN_K: u8 = 2;

/// Maximum total shares n.
pub const THRESHOLD_MAX_N: u8 = 255;

// ── Envelope builder (C2) ────────────────────────────────────────────────────

/// Default threshold parameters when the caller does not specify any.
pub const DEFAULT_K: u8 = 3;
pub const DEFAULT_N: u8 = 5;

/// Minimum plaintext length accepted (length 0 is rejected).
pub const MIN_PLAINTEXT_LEN: usize = 1;

/// HKDF info string for per-guardian share wrapping.
pub const SHARE_WRAP_INFO: &[u8] = b"nip44-v2";

/// Per-message HKDF salt size (32-byte random nonce).
pub const SHARE_WRAP_NONCE_LEN: usize = 32;

/// Wrapped-share wire format version byte. Readers reject any other value.
pub const SHARE_WRAP_VERSION: u8 = 2;

/// Minimum wrapped-share payload size in bytes.
pub const SHARE_WRAP_MIN_PAYLOAD: usize = 1;

/// Maximum wrapped-share payload size in bytes.
pub const SHARE_WRAP_MAX_PAYLOAD: usize = 65_535;

// ── Relay transport (C3) ─────────────────────────────────────────────────────

/// Event kind: heartbeat.
pub const KIND_HEARTBEAT: u32 = 30078;

/// Event kind: encrypted share addressed to a guardian.
pub const KIND_SHARE_STORAGE: u32 = 30079;

/// Event kind: guardian-signed release to recipients.
pub const KIND_SHARE_RELEASE: u32 = 30080;

/// Event kind: guardian acknowledgement of a stored share.
pub const KIND_GUARDIAN_ACK: u32 = 30083;

/// `d` tag prefix for heartbeat events.
pub const HEARTBEAT_D_TAG_PREFIX: &str = "echolock-heartbeat-";

/// Minimum distinct relays a share must be published to.
pub const MIN_RELAY_DISTRIBUTION: usize = 7;

/// Minimum accepting relays for a publish to succeed (quorum).
pub const DEFAULT_MIN_RELAY_SUCCESS: usize = 5;

/// Initial reconnect backoff in milliseconds.
pub const RELAY_BACKOFF_INITIAL_MS: u64 = 250;

/// Reconnect backoff ceiling in milliseconds.
pub const RELAY_BACKOFF_CEILING_MS: u64 = 60_000;

/// Consecutive failures before a relay is demoted from the eligible set.
pub const RELAY_UNHEALTHY_THRESHOLD: u32 = 3;

// ── Switch coordinator (C4) ──────────────────────────────────────────────────

/// Debounce window for `check_in` (seconds) — double check-ins within this
/// window are a no-op.
pub const CHECK_IN_DEBOUNCE_SECS: i64 = 60;

// ── Guardian daemon (C5) ─────────────────────────────────────────────────────

/// Minimum grace period past the heartbeat threshold before release (1 hour).
pub const GUARDIAN_GRACE_FLOOR_SECS: i64 = 3_600;

/// Default interval between release-test evaluations (minutes).
pub const DEFAULT_CHECK_INTERVAL_MINUTES: u32 = 5;

// ── Timelock commitment (C6) ─────────────────────────────────────────────────

/// Average target block time for the settlement chain (seconds).
pub const AVG_BLOCK_TIME_SECS: i64 = 600;

/// Blocks of maturity required past `locktime` before a spend is valid,
/// to absorb chain re-orgs.
pub const TIMELOCK_MATURITY_BLOCKS: u32 = 10;

/// Dust limit in satoshis below which an output is not worth spending.
pub const DUST_LIMIT_SATS: u64 = 546;
