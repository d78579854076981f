//! echolock-cli — local operator surface for switches.
//!
//! Unlike the guardian daemon, this binary embeds the coordinator,
//! relay, and timelock crates directly: there is no RPC server in this
//! system, so every subcommand opens its own `SwitchCoordinator`
//! against the local data directory and talks to the relay pool for
//! the duration of that one command.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;

use echolock_core::{
    EchoLockError, SwitchId, XOnlyPublicKey, DEFAULT_MIN_RELAY_SUCCESS,
};
use echolock_coordinator::{SwitchCoordinator, TimelockRef};
use echolock_crypto::{derive_public, SecretScalar};
use echolock_envelope::BuildParams;
use echolock_relay::{RelayConfig, RelayNetwork};
use echolock_timelock::{HttpChain, TimelockCommitment, TimelockParams};

const SWITCH_ENVELOPE_AAD: &[u8] = b"switch-envelope";

#[derive(Parser, Debug)]
#[command(
    name = "echolock",
    version,
    about = "EchoLock — censorship-resistant dead-man's-switch CLI"
)]
struct Args {
    /// Directory holding switch records, selection state, and timelock
    /// commitments.
    #[arg(long, env = "DATA_DIR", default_value = "~/.echolock")]
    data_dir: PathBuf,

    /// Path to the owner identity key (64 hex chars, 32 bytes).
    /// Defaults to `owner.key` under `--data-dir`.
    #[arg(long)]
    keyfile: Option<PathBuf>,

    /// Relay WebSocket URLs (comma-separated).
    #[arg(long, env = "RELAY_URLS", value_delimiter = ',')]
    relay_urls: Vec<String>,

    /// Minimum relays that must accept a publish.
    #[arg(long, env = "MIN_RELAY_SUCCESS", default_value_t = DEFAULT_MIN_RELAY_SUCCESS)]
    min_relay_success: usize,

    /// Chain-indexer base URL, required for `--with-timelock` and
    /// `show-bitcoin-tx`.
    #[arg(long, env = "CHAIN_API_URL")]
    chain_api_url: Option<String>,

    /// Bitcoin network for timelock addresses and transactions.
    #[arg(long, default_value = "bitcoin")]
    network: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new switch.
    Create {
        #[arg(long)]
        title: String,
        #[arg(long, conflicts_with = "message_file")]
        message: Option<String>,
        #[arg(long, conflicts_with = "message")]
        message_file: Option<PathBuf>,
        #[arg(long)]
        k: u8,
        #[arg(long)]
        n: u8,
        /// Comma-separated hex x-only guardian public keys, count must equal `n`.
        #[arg(long)]
        guardians: String,
        /// Comma-separated hex x-only recipient public keys.
        #[arg(long)]
        recipients: Option<String>,
        #[arg(long, default_value_t = 24.0)]
        check_in_hours: f64,
        /// Also build a CLTV Bitcoin commitment as a third recovery path.
        #[arg(long)]
        with_timelock: bool,
        /// Required when `--with-timelock` is set.
        #[arg(long)]
        timelock_password: Option<String>,
    },
    /// Refresh a switch's heartbeat.
    CheckIn {
        #[arg(long)]
        id: Option<String>,
    },
    /// Show a switch's current state.
    Status {
        #[arg(long)]
        id: Option<String>,
    },
    /// List every locally known switch.
    List,
    /// Make `<id>` the default for commands that omit `--id`.
    Select { id: String },
    /// Recover the plaintext from a locally held set of shares. Does
    /// not touch the relay network.
    TestRelease {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        shares_file: PathBuf,
        #[arg(long, default_value = "switch-envelope")]
        aad: String,
        #[arg(long)]
        out_file: Option<PathBuf>,
    },
    /// Build (never broadcast) a signed transaction sweeping a matured
    /// timelock commitment to `--destination`.
    ShowBitcoinTx {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        destination: String,
        #[arg(long, default_value_t = 10)]
        fee_rate: u64,
        #[arg(long)]
        password: String,
    },
    /// Remove a switch's local record.
    Delete {
        #[arg(long)]
        id: Option<String>,
    },
}

fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<EchoLockError>() {
        Some(EchoLockError::AeadAuthFailure) => 10,
        Some(EchoLockError::IntegrityFailure) => 11,
        Some(EchoLockError::SignatureFailure) => 12,
        Some(EchoLockError::InsufficientShares { .. }) => 13,
        Some(EchoLockError::InconsistentShares) => 14,
        Some(EchoLockError::CurveError) => 15,
        Some(EchoLockError::RngFailure) => 16,
        Some(EchoLockError::ParameterError(_)) => 20,
        Some(EchoLockError::SizeLimit(_)) => 21,
        Some(EchoLockError::RelayUnreachable(_)) => 30,
        Some(EchoLockError::RelayRejected(_)) => 31,
        Some(EchoLockError::QuorumNotMet { .. }) => 32,
        Some(EchoLockError::InvalidStateTransition { .. }) => 40,
        Some(EchoLockError::SwitchNotFound(_)) => 41,
        Some(EchoLockError::TimelockNotValid { .. }) => 50,
        Some(EchoLockError::ChainUnreachable(_)) => 51,
        Some(EchoLockError::WeakPassword(_)) => 52,
        Some(EchoLockError::ScriptConstructionError(_)) => 53,
        Some(EchoLockError::NoUtxos) => 54,
        Some(EchoLockError::InsufficientValue) => 55,
        Some(EchoLockError::Io(_)) => 60,
        Some(EchoLockError::Other(_)) => 61,
        None => 1,
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,echolock=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::ExitCode::from(exit_code(&e) as u8)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let data_dir = expand_tilde(&args.data_dir);
    fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;

    let keyfile = args
        .keyfile
        .map(|p| expand_tilde(&p))
        .unwrap_or_else(|| data_dir.join("owner.key"));
    let sk = load_or_generate_key(&keyfile).context("loading owner key")?;
    let owner_pubkey = derive_public(&sk);

    let network: bitcoin::Network = args
        .network
        .parse()
        .with_context(|| format!("unrecognized network {:?}", args.network))?;

    let relay_config = RelayConfig {
        urls: args.relay_urls.clone(),
        min_success: args.min_relay_success,
        ..RelayConfig::default()
    };
    let relay = RelayNetwork::new(relay_config);
    let mut coordinator = SwitchCoordinator::open(data_dir.clone(), relay, args.min_relay_success)
        .context("opening switch coordinator")?;

    match args.command {
        Command::Create {
            title,
            message,
            message_file,
            k,
            n,
            guardians,
            recipients,
            check_in_hours,
            with_timelock,
            timelock_password,
        } => {
            let plaintext = match (message, message_file) {
                (Some(m), None) => m.into_bytes(),
                (None, Some(path)) => {
                    fs::read(&path).with_context(|| format!("reading {}", path.display()))?
                }
                _ => bail!("exactly one of --message or --message-file is required"),
            };
            let guardians = parse_pubkeys(&guardians)?;
            let recipients = recipients.map(|s| parse_pubkeys(&s)).transpose()?.unwrap_or_default();
            if guardians.len() != n as usize {
                bail!("--guardians lists {} keys but n={}", guardians.len(), n);
            }
            let check_in_seconds = (check_in_hours * 3600.0).round() as i64;
            let now = chrono::Utc::now().timestamp();

            let params = BuildParams {
                owner_pubkey,
                created_at: now,
                k,
                n,
                recipients,
                guardians,
                check_in_seconds,
                aad: SWITCH_ENVELOPE_AAD.to_vec(),
            };
            let switch_id = coordinator
                .create(&sk, owner_pubkey, title, &plaintext, params, now)
                .await?;
            info!(switch = %switch_id, "switch armed");

            if with_timelock {
                let password = timelock_password
                    .context("--timelock-password is required with --with-timelock")?;
                let chain_url = args
                    .chain_api_url
                    .as_ref()
                    .context("--chain-api-url is required with --with-timelock")?;
                let chain = HttpChain::new(chain_url.clone());
                let timelock_params = TimelockParams {
                    check_in_seconds,
                    password,
                    network,
                };
                let commitment = echolock_timelock::build(&chain, &timelock_params).await?;
                save_timelock(&data_dir, switch_id, &commitment)?;
                coordinator.attach_timelock(
                    switch_id,
                    TimelockRef {
                        address: commitment.address_str.clone(),
                        locktime_height: commitment.locktime_height,
                    },
                )?;
                println!("timelock address: {}", commitment.address_str);
            }

            select_switch(&data_dir, switch_id)?;
            println!("{}", switch_id.to_hex());
            Ok(())
        }

        Command::CheckIn { id } => {
            let id = resolve_switch_id(&data_dir, id)?;
            let now = chrono::Utc::now().timestamp();
            coordinator.check_in(&sk, id, now).await?;
            println!("checked in {}", id.to_hex());
            Ok(())
        }

        Command::Status { id } => {
            let id = resolve_switch_id(&data_dir, id)?;
            let now = chrono::Utc::now().timestamp();
            let status = coordinator.status(id, now)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }

        Command::List => {
            let now = chrono::Utc::now().timestamp();
            for id in coordinator.list() {
                match coordinator.status(id, now) {
                    Ok(status) => println!(
                        "{}  {:<10}  {:<10}  {}s remaining",
                        status.id, status.title, status.state, status.time_remaining_seconds
                    ),
                    Err(e) => println!("{}  <error: {e}>", id.to_hex()),
                }
            }
            Ok(())
        }

        Command::Select { id } => {
            let parsed = SwitchId::from_hex(&id).context("parsing switch id")?;
            let now = chrono::Utc::now().timestamp();
            coordinator.status(parsed, now)?;
            select_switch(&data_dir, parsed)?;
            println!("selected {}", parsed.to_hex());
            Ok(())
        }

        Command::TestRelease {
            id,
            shares_file,
            aad,
            out_file,
        } => {
            let id = resolve_switch_id(&data_dir, id)?;
            let raw = fs::read_to_string(&shares_file)
                .with_context(|| format!("reading {}", shares_file.display()))?;
            let shares: Vec<echolock_crypto::Share> =
                serde_json::from_str(&raw).context("parsing shares file")?;
            let plaintext = coordinator.test_release(id, &shares, aad.as_bytes())?;
            match out_file {
                Some(path) => {
                    fs::write(&path, &plaintext)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("wrote {} bytes to {}", plaintext.len(), path.display());
                }
                None => std::io::stdout().write_all(&plaintext)?,
            }
            Ok(())
        }

        Command::ShowBitcoinTx {
            id,
            destination,
            fee_rate,
            password,
        } => {
            let id = resolve_switch_id(&data_dir, id)?;
            let commitment = load_timelock(&data_dir, id)?;
            let chain_url = args
                .chain_api_url
                .context("--chain-api-url is required for show-bitcoin-tx")?;
            let chain = HttpChain::new(chain_url);
            let dest: bitcoin::Address<bitcoin::address::NetworkUnchecked> =
                destination.parse().context("parsing destination address")?;
            let dest = dest
                .require_network(network)
                .context("destination address does not match --network")?;
            let hex_tx =
                echolock_timelock::spend(&chain, &commitment, &dest, network, fee_rate, &password, true)
                    .await?;
            println!("{hex_tx}");
            Ok(())
        }

        Command::Delete { id } => {
            let id = resolve_switch_id(&data_dir, id)?;
            coordinator.delete(id)?;
            let _ = fs::remove_file(timelock_path(&data_dir, id));
            if let Ok(selected) = fs::read_to_string(selected_path(&data_dir)) {
                if selected.trim() == id.to_hex() {
                    let _ = fs::remove_file(selected_path(&data_dir));
                }
            }
            println!("deleted {}", id.to_hex());
            Ok(())
        }
    }
}

fn parse_pubkeys(csv: &str) -> anyhow::Result<Vec<XOnlyPublicKey>> {
    csv.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| XOnlyPublicKey::from_hex(s).with_context(|| format!("parsing public key {s:?}")))
        .collect()
}

fn selected_path(data_dir: &Path) -> PathBuf {
    data_dir.join("selected_switch")
}

fn select_switch(data_dir: &Path, id: SwitchId) -> anyhow::Result<()> {
    fs::write(selected_path(data_dir), id.to_hex()).context("persisting selected switch")
}

fn resolve_switch_id(data_dir: &Path, id: Option<String>) -> anyhow::Result<SwitchId> {
    match id {
        Some(s) => SwitchId::from_hex(&s).context("parsing --id"),
        None => {
            let raw = fs::read_to_string(selected_path(data_dir))
                .context("no --id given and no switch selected (run `select` first)")?;
            SwitchId::from_hex(raw.trim()).context("parsing selected switch pointer")
        }
    }
}

fn timelock_path(data_dir: &Path, id: SwitchId) -> PathBuf {
    data_dir.join("timelocks").join(format!("{}.json", id.to_hex()))
}

fn save_timelock(data_dir: &Path, id: SwitchId, commitment: &TimelockCommitment) -> anyhow::Result<()> {
    let path = timelock_path(data_dir, id);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_vec_pretty(commitment)?;
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(&json)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, &path)?;
    Ok(())
}

fn load_timelock(data_dir: &Path, id: SwitchId) -> anyhow::Result<TimelockCommitment> {
    let path = timelock_path(data_dir, id);
    let raw = fs::read_to_string(&path).with_context(|| {
        format!(
            "no timelock commitment recorded for {} ({})",
            id.to_hex(),
            path.display()
        )
    })?;
    serde_json::from_str(&raw).context("parsing timelock commitment")
}

/// Load a hex-encoded secret key from `path`. Generates and persists a
/// fresh one if the file does not yet exist.
fn load_or_generate_key(path: &Path) -> anyhow::Result<SecretScalar> {
    if let Ok(hexed) = fs::read_to_string(path) {
        let bytes = hex::decode(hexed.trim()).context("decoding keyfile hex")?;
        if bytes.len() != 32 {
            bail!("keyfile must contain 32 bytes, got {}", bytes.len());
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        return SecretScalar::from_bytes(arr).context("keyfile is not a valid secret key");
    }
    tracing::warn!(path = %path.display(), "no keyfile found — generating one. Back it up.");
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let sk = SecretScalar::generate();
    fs::write(path, hex::encode(sk.as_bytes()))
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

#[cfg(test)]
mod tests {
    use super::*;
    use echolock_crypto::KdfParams;
    use echolock_timelock::WrappedKey;

    fn temp_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("echolock-cli-test-{tag}-{}", std::process::id()))
    }

    fn sample_commitment() -> TimelockCommitment {
        TimelockCommitment {
            script: bitcoin::ScriptBuf::new(),
            address_str: "bcrt1qexampleaddress".into(),
            locktime_height: 900_000,
            wrapped_signing_key: WrappedKey {
                iv: [0u8; echolock_core::AEAD_IV_LEN],
                tag: [0u8; echolock_core::AEAD_TAG_LEN],
                ciphertext: vec![1, 2, 3, 4],
                kdf_params: KdfParams {
                    salt: vec![9u8; 16],
                    iterations: 600_000,
                },
            },
        }
    }

    #[test]
    fn saved_timelock_round_trips_byte_identical() {
        let dir = temp_dir("timelock-roundtrip");
        let id = SwitchId::from_bytes([7u8; 16]);
        let commitment = sample_commitment();
        save_timelock(&dir, id, &commitment).unwrap();

        let raw_first = fs::read(timelock_path(&dir, id)).unwrap();
        let loaded = load_timelock(&dir, id).unwrap();
        assert_eq!(loaded.address_str, commitment.address_str);
        assert_eq!(loaded.locktime_height, commitment.locktime_height);

        // A dry-run `spend` call never touches this file; re-reading it
        // after only a load (no save) must be byte-identical.
        let raw_second = fs::read(timelock_path(&dir, id)).unwrap();
        assert_eq!(raw_first, raw_second);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn select_then_resolve_without_explicit_id() {
        let dir = temp_dir("select-resolve");
        fs::create_dir_all(&dir).unwrap();
        let id = SwitchId::from_bytes([3u8; 16]);
        select_switch(&dir, id).unwrap();
        let resolved = resolve_switch_id(&dir, None).unwrap();
        assert_eq!(resolved, id);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn resolve_without_selection_or_id_fails() {
        let dir = temp_dir("select-resolve-missing");
        fs::create_dir_all(&dir).unwrap();
        assert!(resolve_switch_id(&dir, None).is_err());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn parse_pubkeys_rejects_malformed_hex() {
        assert!(parse_pubkeys("not-hex").is_err());
        assert!(parse_pubkeys("").unwrap().is_empty());
    }
}
