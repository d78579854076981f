//! echolock-guardiand — the EchoLock guardian daemon binary.
//!
//! Startup sequence:
//!   1. Load the guardian's long-term keypair
//!   2. Open (or initialise) the guardian record store
//!   3. Connect to the configured relay pool
//!   4. Run the main loop: poll shares, heartbeats, and the release
//!      test on a fixed interval until shut down

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use echolock_core::{DEFAULT_CHECK_INTERVAL_MINUTES, DEFAULT_MIN_RELAY_SUCCESS, GUARDIAN_GRACE_FLOOR_SECS};
use echolock_crypto::{derive_public, SecretScalar};
use echolock_guardian::GuardianDaemon;
use echolock_relay::{RelayConfig, RelayNetwork};

#[derive(Parser, Debug)]
#[command(
    name = "echolock-guardiand",
    version,
    about = "EchoLock guardian daemon — holds a threshold share and watches for silence"
)]
struct Args {
    /// Path to the guardian's secret key file (64 hex chars, 32 bytes).
    #[arg(long, default_value = "~/.echolock/guardian.key")]
    keyfile: PathBuf,

    /// Directory for persisted guardian records.
    #[arg(long, default_value = "~/.echolock/guardian-data")]
    data_dir: PathBuf,

    /// Relay WebSocket URLs (comma-separated).
    #[arg(long, value_delimiter = ',')]
    relay_urls: Vec<String>,

    /// Minimum relays that must accept a publish.
    #[arg(long, default_value_t = DEFAULT_MIN_RELAY_SUCCESS)]
    min_relay_success: usize,

    /// Interval between release-test evaluations, in minutes.
    #[arg(long, default_value_t = DEFAULT_CHECK_INTERVAL_MINUTES)]
    check_interval_minutes: u32,

    /// Grace period added to a switch's threshold before release fires,
    /// in seconds. Floored at `GUARDIAN_GRACE_FLOOR_SECS`.
    #[arg(long, default_value_t = GUARDIAN_GRACE_FLOOR_SECS)]
    grace_seconds: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,echolock=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!("echolock guardian daemon starting");

    if args.relay_urls.is_empty() {
        anyhow::bail!("at least one --relay-urls entry is required");
    }

    // ── Identity ──────────────────────────────────────────────────────────────
    let keyfile = expand_tilde(&args.keyfile);
    let sk = load_or_generate_key(&keyfile).context("loading guardian key")?;
    let pubkey = derive_public(&sk);
    info!(pubkey = %pubkey, "guardian identity loaded");

    // ── Record store ──────────────────────────────────────────────────────────
    let data_dir = expand_tilde(&args.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;

    // ── Relay pool ────────────────────────────────────────────────────────────
    let relay_config = RelayConfig {
        urls: args.relay_urls.clone(),
        min_success: args.min_relay_success,
        ..RelayConfig::default()
    };
    let relay = RelayNetwork::new(relay_config);

    let mut daemon = GuardianDaemon::open(
        sk,
        pubkey,
        &data_dir,
        relay,
        args.grace_seconds,
        args.min_relay_success,
    )
    .context("opening guardian daemon")?;

    info!(records = daemon.record_count(), "guardian ready");

    // ── Main loop ─────────────────────────────────────────────────────────────
    let mut tick = tokio::time::interval(std::time::Duration::from_secs(
        u64::from(args.check_interval_minutes) * 60,
    ));
    loop {
        tokio::select! {
            _ = tick.tick() => {
                let now = chrono::Utc::now().timestamp();
                if let Err(e) = daemon.poll_once(now).await {
                    warn!(error = %e, "poll iteration failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received, persisting state");
                break;
            }
        }
    }

    Ok(())
}

/// Load a hex-encoded secret key from `path`. Generates and persists a
/// fresh one if the file does not yet exist — first-run convenience
/// for local development; production operators should pre-provision
/// the keyfile with `echolock-keygen`.
fn load_or_generate_key(path: &Path) -> anyhow::Result<SecretScalar> {
    if let Ok(hexed) = std::fs::read_to_string(path) {
        let bytes = hex::decode(hexed.trim()).context("decoding keyfile hex")?;
        if bytes.len() != 32 {
            anyhow::bail!("keyfile must contain 32 bytes, got {}", bytes.len());
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        return SecretScalar::from_bytes(arr).context("keyfile is not a valid secret key");
    }
    warn!(path = %path.display(), "no keyfile found — generating one. Back it up.");
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let sk = SecretScalar::generate();
    std::fs::write(path, hex::encode(sk.as_bytes()))
        .with_context(|| format!("writing keyfile {}", path.display()))?;
    Ok(sk)
}

/// Expand a leading `~` to the user's home directory (`HOME` or `USERPROFILE`).
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
