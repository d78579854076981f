use std::collections::HashMap;

use echolock_core::{
    EchoLockError, SwitchId, Timestamp, XOnlyPublicKey, GUARDIAN_GRACE_FLOOR_SECS,
    KIND_GUARDIAN_ACK, KIND_HEARTBEAT, KIND_SHARE_RELEASE, KIND_SHARE_STORAGE,
};
use echolock_crypto::{ecdh_shared_x, SecretScalar};
use echolock_envelope::wrap::{unwrap, wrap};
use echolock_relay::{Event, Filter, RelayNetwork};
use tracing::{debug, info, warn};

use crate::record::{GuardianRecord, RecordStore};

/// The guardian's share of the state needed to run one poll iteration.
/// Owns the only copy of `sk`; nothing outside this crate ever sees it.
pub struct GuardianDaemon {
    sk: SecretScalar,
    pubkey: XOnlyPublicKey,
    store: RecordStore,
    records: HashMap<(SwitchId, u8), GuardianRecord>,
    relay: RelayNetwork,
    grace_seconds: i64,
    min_relay_success: usize,
}

impl GuardianDaemon {
    pub fn open(
        sk: SecretScalar,
        pubkey: XOnlyPublicKey,
        data_dir: impl AsRef<std::path::Path>,
        relay: RelayNetwork,
        grace_seconds: i64,
        min_relay_success: usize,
    ) -> Result<Self, EchoLockError> {
        let grace_seconds = grace_seconds.max(GUARDIAN_GRACE_FLOOR_SECS);
        let store = RecordStore::open(data_dir);
        let records = store.load()?;
        Ok(Self {
            sk,
            pubkey,
            store,
            records,
            relay,
            grace_seconds,
            min_relay_success,
        })
    }

    fn persist(&self) -> Result<(), EchoLockError> {
        self.store.save(&self.records)
    }

    /// Poll relays once for share-storage, heartbeat and pending
    /// release-test work. Intended to be driven by a `tokio::select!`
    /// loop alongside a periodic timer in `echolock-guardiand`.
    pub async fn poll_once(&mut self, now: Timestamp) -> Result<(), EchoLockError> {
        self.poll_share_storage().await?;
        self.poll_heartbeats().await?;
        self.run_release_test(now).await?;
        Ok(())
    }

    async fn poll_share_storage(&mut self) -> Result<(), EchoLockError> {
        let filter = Filter::new()
            .kind(KIND_SHARE_STORAGE)
            .p_tag(self.pubkey);
        let events = self.relay.retrieve(&filter).await?;
        for event in events {
            if let Err(e) = self.handle_share_storage_event(&event).await {
                warn!(event = %event.id, error = %e, "ignoring share-storage event");
            }
        }
        Ok(())
    }

    async fn handle_share_storage_event(&mut self, event: &Event) -> Result<(), EchoLockError> {
        let (switch_id, share_index) = parse_share_d_tag(event)?;
        let decoded = decode_share_content(&event.content)?;
        let shared_x = ecdh_shared_x(&self.sk, &decoded.ephemeral_pubkey)?;
        let share_bytes = unwrap(
            &shared_x,
            decoded.version,
            &decoded.nonce,
            &decoded.ciphertext,
            &decoded.mac,
        )?;
        let share: echolock_crypto::Share = serde_json::from_slice(&share_bytes)?;

        let recipients = event
            .tags
            .iter()
            .filter(|t| t.first().map(|s| s.as_str()) == Some("recipient"))
            .filter_map(|t| t.get(1))
            .filter_map(|hex| XOnlyPublicKey::from_hex(hex).ok())
            .collect();

        let is_new = !self.records.contains_key(&(switch_id, share_index));
        let threshold_seconds = parse_check_in_hours(event).unwrap_or(0);

        let encrypted_share = echolock_envelope::EncryptedShare {
            guardian_pubkey: self.pubkey,
            ephemeral_pubkey: decoded.ephemeral_pubkey,
            share_index,
            k: share.k,
            n: share.n,
            version: decoded.version,
            nonce: decoded.nonce,
            ciphertext: decoded.ciphertext,
            mac: decoded.mac,
        };
        let record = GuardianRecord {
            switch_id,
            share_index,
            owner_pubkey: event.pubkey,
            threshold_seconds,
            encrypted_share,
            recipient_pubkeys: recipients,
            last_heartbeat_seen: event.created_at,
            enrolled_at: event.created_at,
            released: false,
            released_at: None,
        };
        self.records.insert((switch_id, share_index), record);
        self.persist()?;

        if is_new {
            let ack = build_ack(&self.sk, self.pubkey, event.pubkey, switch_id, share_index, event.created_at);
            self.relay.publish(&ack, self.min_relay_success).await?;
        }
        Ok(())
    }

    async fn poll_heartbeats(&mut self) -> Result<(), EchoLockError> {
        let owners: Vec<XOnlyPublicKey> = self
            .records
            .values()
            .map(|r| r.owner_pubkey)
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect();
        if owners.is_empty() {
            return Ok(());
        }
        for owner in owners {
            let filter = Filter::new().kind(KIND_HEARTBEAT).author(owner);
            let events = self.relay.retrieve(&filter).await?;
            for event in events {
                if event.kind != KIND_HEARTBEAT || !event.verify() {
                    debug!(event = %event.id, "ignoring unverified heartbeat");
                    continue;
                }
                let Some(d_tag) = event.d_tag() else { continue };
                let bare = echolock_relay::strip_heartbeat_d_tag_prefix(d_tag);
                let Ok(switch_id) = SwitchId::from_hex(bare) else { continue };
                for record in self
                    .records
                    .values_mut()
                    .filter(|r| r.switch_id == switch_id && r.owner_pubkey == event.pubkey)
                {
                    record.observe_heartbeat(event.created_at);
                }
            }
        }
        self.persist()?;
        Ok(())
    }

    async fn run_release_test(&mut self, now: Timestamp) -> Result<(), EchoLockError> {
        let due: Vec<(SwitchId, u8)> = self
            .records
            .iter()
            .filter(|(_, r)| r.is_overdue(now, self.grace_seconds))
            .map(|(k, _)| *k)
            .collect();

        for key in due {
            if let Err(e) = self.release_one(key, now).await {
                warn!(switch = ?key.0, error = %e, "release publish failed, retrying next tick");
            }
        }
        Ok(())
    }

    async fn release_one(&mut self, key: (SwitchId, u8), now: Timestamp) -> Result<(), EchoLockError> {
        let record = self
            .records
            .get(&key)
            .ok_or_else(|| EchoLockError::SwitchNotFound(key.0.to_hex()))?
            .clone();

        let shared_x_in = ecdh_shared_x(&self.sk, &record.encrypted_share.ephemeral_pubkey)?;
        let share_bytes = unwrap(
            &shared_x_in,
            record.encrypted_share.version,
            &record.encrypted_share.nonce,
            &record.encrypted_share.ciphertext,
            &record.encrypted_share.mac,
        )?;

        for recipient in &record.recipient_pubkeys {
            let shared_x_out = ecdh_shared_x(&self.sk, recipient)?;
            let (nonce, ciphertext, mac) = wrap(&shared_x_out, &share_bytes)?;
            let content = encode_release_content(self.pubkey, &nonce, &ciphertext, &mac);
            let tags = vec![
                vec!["p".to_string(), recipient.to_hex()],
                vec![
                    "d".to_string(),
                    format!("{}:{}", record.switch_id.to_hex(), record.share_index),
                ],
            ];
            let release = Event::build(
                &self.sk,
                self.pubkey,
                now,
                KIND_SHARE_RELEASE,
                tags,
                content,
            );
            self.relay.publish(&release, self.min_relay_success).await?;
        }

        if let Some(r) = self.records.get_mut(&key) {
            r.mark_released(now);
        }
        self.persist()?;
        info!(switch = %key.0, share_index = key.1, "released share to recipients");
        Ok(())
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

struct DecodedShareContent {
    ephemeral_pubkey: XOnlyPublicKey,
    version: u8,
    nonce: [u8; 32],
    ciphertext: Vec<u8>,
    mac: [u8; 32],
}

fn decode_share_content(content: &str) -> Result<DecodedShareContent, EchoLockError> {
    use base64::Engine;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(content)
        .map_err(|e| EchoLockError::ParameterError(format!("bad share content: {e}")))?;
    if bytes.len() < 32 + 1 + 32 + 32 {
        return Err(EchoLockError::ParameterError("share content too short".into()));
    }
    let mut ephemeral = [0u8; 32];
    ephemeral.copy_from_slice(&bytes[0..32]);
    let version = bytes[32];
    let mut nonce = [0u8; 32];
    nonce.copy_from_slice(&bytes[33..65]);
    let mac_offset = bytes.len() - 32;
    let ciphertext = bytes[65..mac_offset].to_vec();
    let mut mac = [0u8; 32];
    mac.copy_from_slice(&bytes[mac_offset..]);
    Ok(DecodedShareContent {
        ephemeral_pubkey: XOnlyPublicKey(ephemeral),
        version,
        nonce,
        ciphertext,
        mac,
    })
}

fn encode_release_content(from_pubkey: XOnlyPublicKey, nonce: &[u8; 32], ciphertext: &[u8], mac: &[u8; 32]) -> String {
    use base64::Engine;
    let mut bytes = Vec::with_capacity(32 + 1 + 32 + ciphertext.len() + 32);
    bytes.extend_from_slice(&from_pubkey.0);
    bytes.push(echolock_core::SHARE_WRAP_VERSION);
    bytes.extend_from_slice(nonce);
    bytes.extend_from_slice(ciphertext);
    bytes.extend_from_slice(mac);
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn parse_share_d_tag(event: &Event) -> Result<(SwitchId, u8), EchoLockError> {
    let d_tag = event
        .d_tag()
        .ok_or_else(|| EchoLockError::ParameterError("share event missing d tag".into()))?;
    let (id_hex, index_str) = d_tag
        .split_once(':')
        .ok_or_else(|| EchoLockError::ParameterError("malformed share d tag".into()))?;
    let switch_id = SwitchId::from_hex(id_hex)
        .map_err(|e| EchoLockError::ParameterError(format!("bad switch id in d tag: {e}")))?;
    let index: u8 = index_str
        .parse()
        .map_err(|_| EchoLockError::ParameterError("bad share index in d tag".into()))?;
    Ok((switch_id, index))
}

fn parse_check_in_hours(event: &Event) -> Option<i64> {
    event
        .tags
        .iter()
        .find(|t| t.first().map(|s| s.as_str()) == Some("threshold_hours"))
        .and_then(|t| t.get(1))
        .and_then(|v| v.parse::<f64>().ok())
        .map(|hours| (hours * 3_600.0) as i64)
}

fn build_ack(
    sk: &SecretScalar,
    guardian_pubkey: XOnlyPublicKey,
    owner_pubkey: XOnlyPublicKey,
    switch_id: SwitchId,
    share_index: u8,
    now: Timestamp,
) -> Event {
    let tags = vec![
        vec!["p".to_string(), owner_pubkey.to_hex()],
        vec![
            "d".to_string(),
            format!("{}:{}", switch_id.to_hex(), share_index),
        ],
    ];
    let content = serde_json::json!({
        "switch_id": switch_id.to_hex(),
        "share_index": share_index,
    })
    .to_string();
    Event::build(sk, guardian_pubkey, now, KIND_GUARDIAN_ACK, tags, content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_d_tag_parses_index() {
        let sk = SecretScalar::generate();
        let pk = echolock_crypto::derive_public(&sk);
        let event = Event::build(
            &sk,
            pk,
            1_000,
            KIND_SHARE_STORAGE,
            vec![vec!["d".to_string(), "aabbccddeeff00112233445566778899:3".to_string()]],
            "x".to_string(),
        );
        let (id, index) = parse_share_d_tag(&event).unwrap();
        assert_eq!(index, 3);
        assert_eq!(id.to_hex(), "aabbccddeeff00112233445566778899");
    }

    #[test]
    fn share_content_round_trips() {
        let pk = XOnlyPublicKey([3u8; 32]);
        let content = encode_release_content(pk, &[1u8; 32], &[9, 9, 9], &[2u8; 32]);
        let decoded = decode_share_content(&content).unwrap();
        assert_eq!(decoded.ephemeral_pubkey, pk);
        assert_eq!(decoded.ciphertext, vec![9, 9, 9]);
    }

    #[test]
    fn check_in_hours_parses() {
        let sk = SecretScalar::generate();
        let pk = echolock_crypto::derive_public(&sk);
        let event = Event::build(
            &sk,
            pk,
            1_000,
            KIND_SHARE_STORAGE,
            vec![vec!["threshold_hours".to_string(), "2".to_string()]],
            "x".to_string(),
        );
        assert_eq!(parse_check_in_hours(&event), Some(7_200));
    }

    fn temp_dir(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("echolock-guardian-daemon-test-{tag}-{}", std::process::id()))
    }

    /// §8 E2E-2: an overdue record is released once, to every recipient,
    /// on the very next `poll_once` — exercised against a zero-relay
    /// config (`min_success: 0`, no urls) so `publish` succeeds
    /// trivially and only the local release decision is under test.
    #[tokio::test]
    async fn overdue_record_is_released_exactly_once() {
        let guardian_sk = SecretScalar::generate();
        let guardian_pk = echolock_crypto::derive_public(&guardian_sk);
        let owner_sk = SecretScalar::generate();
        let owner_pk = echolock_crypto::derive_public(&owner_sk);
        let recipient_sk = SecretScalar::generate();
        let recipient_pk = echolock_crypto::derive_public(&recipient_sk);

        let params = echolock_envelope::BuildParams {
            owner_pubkey: owner_pk,
            created_at: 1_000,
            k: 1,
            n: 1,
            recipients: vec![recipient_pk],
            guardians: vec![guardian_pk],
            check_in_seconds: 3,
            aad: b"switch-envelope".to_vec(),
        };
        let transcript = echolock_envelope::build(b"hello", &params).unwrap();
        let encrypted_share = transcript.encrypted_shares[0].clone();
        let switch_id = SwitchId::from_bytes(transcript.switch_id_seed);

        let dir = temp_dir("overdue-release");
        let store = RecordStore::open(&dir);
        let mut records = HashMap::new();
        let record = GuardianRecord {
            switch_id,
            share_index: 1,
            owner_pubkey: owner_pk,
            threshold_seconds: params.check_in_seconds,
            encrypted_share,
            recipient_pubkeys: vec![recipient_pk],
            last_heartbeat_seen: 1_000,
            enrolled_at: 1_000,
            released: false,
            released_at: None,
        };
        records.insert((switch_id, 1), record);
        store.save(&records).unwrap();

        let relay = RelayNetwork::new(echolock_relay::RelayConfig::default());
        let mut daemon = GuardianDaemon::open(guardian_sk, guardian_pk, &dir, relay, 0, 0).unwrap();

        let overdue_at = 1_000 + params.check_in_seconds + GUARDIAN_GRACE_FLOOR_SECS + 1;
        daemon.poll_once(overdue_at).await.unwrap();

        let reloaded = store.load().unwrap();
        let released_record = &reloaded[&(switch_id, 1)];
        assert!(released_record.released);
        assert_eq!(released_record.released_at, Some(overdue_at));

        // A second poll must not release again (idempotent per §8's
        // "exactly once" requirement).
        daemon.poll_once(overdue_at + 10).await.unwrap();
        let reloaded_again = store.load().unwrap();
        assert_eq!(reloaded_again[&(switch_id, 1)].released_at, Some(overdue_at));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
