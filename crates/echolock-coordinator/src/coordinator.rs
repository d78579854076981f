use std::collections::HashMap;
use std::path::PathBuf;

use echolock_core::{EchoLockError, SwitchId, Timestamp, XOnlyPublicKey, MIN_RELAY_DISTRIBUTION};
use echolock_crypto::SecretScalar;
use echolock_envelope::{build as build_envelope, BuildParams};
use echolock_relay::{Event, Filter, RelayNetwork};
use tracing::{info, warn};

use crate::heartbeat::{build_heartbeat, is_debounced, CANCEL_SENTINEL_THRESHOLD_SECONDS};
use crate::store::SwitchStore;
use crate::switch::{ShareManifestEntry, Switch, SwitchState, TimelockRef};

/// A read model returned by `status()`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SwitchStatus {
    pub id: String,
    pub title: String,
    pub state: String,
    pub time_remaining_seconds: i64,
    pub next_heartbeat_due: Timestamp,
    pub timelock: Option<TimelockRef>,
}

/// Owns the lifecycle state machine of every switch belonging to this
/// process, plus the persistence and relay handles it needs to act on
/// them.
pub struct SwitchCoordinator {
    store: SwitchStore,
    switches: HashMap<SwitchId, Switch>,
    relay: RelayNetwork,
    min_relay_success: usize,
}

impl SwitchCoordinator {
    pub fn open(data_dir: PathBuf, relay: RelayNetwork, min_relay_success: usize) -> Result<Self, EchoLockError> {
        let store = SwitchStore::open(&data_dir);
        let switches = store.load()?;
        Ok(Self {
            store,
            switches,
            relay,
            min_relay_success,
        })
    }

    fn persist(&self) -> Result<(), EchoLockError> {
        self.store.save(&self.switches)
    }

    /// Build the envelope and share set, publish shares, publish the
    /// initial heartbeat, and persist the switch in `ARMED`.
    pub async fn create(
        &mut self,
        sk: &SecretScalar,
        owner_pubkey: XOnlyPublicKey,
        title: String,
        plaintext: &[u8],
        params: BuildParams,
        now: Timestamp,
    ) -> Result<SwitchId, EchoLockError> {
        let guardians = params.guardians.clone();
        let recipients = params.recipients.clone();
        let check_in_seconds = params.check_in_seconds;
        let transcript = build_envelope(plaintext, &params)?;
        let switch_id = SwitchId::from_bytes(transcript.switch_id_seed);

        for (i, encrypted) in transcript.encrypted_shares.iter().enumerate() {
            let content = encode_share_content(encrypted);
            let tags = share_storage_tags(switch_id, i as u8 + 1, encrypted, check_in_seconds, &recipients);
            let event = Event::build(
                sk,
                owner_pubkey,
                now,
                echolock_core::KIND_SHARE_STORAGE,
                tags,
                content,
            );
            let outcome = self
                .relay
                .publish(&event, self.min_relay_success.min(MIN_RELAY_DISTRIBUTION))
                .await?;
            info!(
                switch = %switch_id,
                share_index = i + 1,
                accepted = outcome.accepted_by.len(),
                "published share"
            );
        }

        let heartbeat = build_heartbeat(sk, owner_pubkey, switch_id, now, check_in_seconds, &guardians);
        self.relay.publish(&heartbeat, self.min_relay_success).await?;

        let switch = Switch {
            id: switch_id,
            owner_pubkey,
            title,
            created_at: now,
            check_in_seconds,
            last_heartbeat: now,
            check_in_count: 0,
            state: SwitchState::Armed,
            envelope: transcript.envelope,
            shares: guardians
                .iter()
                .enumerate()
                .map(|(i, g)| ShareManifestEntry {
                    index: i as u8 + 1,
                    guardian_pubkey: *g,
                })
                .collect(),
            timelock: None,
            recipients,
        };
        self.switches.insert(switch_id, switch);
        self.persist()?;
        Ok(switch_id)
    }

    /// Issue a new heartbeat at `now`. Requires `ARMED`; debounced
    /// within the configured window.
    pub async fn check_in(
        &mut self,
        sk: &SecretScalar,
        id: SwitchId,
        now: Timestamp,
    ) -> Result<(), EchoLockError> {
        let switch = self
            .switches
            .get_mut(&id)
            .ok_or_else(|| EchoLockError::SwitchNotFound(id.to_hex()))?;
        if switch.state != SwitchState::Armed {
            return Err(EchoLockError::InvalidStateTransition {
                from: format!("check_in while {}", switch.state),
            });
        }
        if now < switch.last_heartbeat {
            return Err(EchoLockError::ParameterError(
                "heartbeat timestamp must be monotonic".into(),
            ));
        }
        if is_debounced(switch.last_heartbeat, now) {
            return Ok(());
        }
        let guardians: Vec<XOnlyPublicKey> =
            switch.shares.iter().map(|s| s.guardian_pubkey).collect();
        let heartbeat = build_heartbeat(
            sk,
            switch.owner_pubkey,
            id,
            now,
            switch.check_in_seconds,
            &guardians,
        );
        self.relay.publish(&heartbeat, self.min_relay_success).await?;
        switch.last_heartbeat = now;
        switch.check_in_count += 1;
        self.persist()?;
        Ok(())
    }

    pub fn pause(&mut self, id: SwitchId) -> Result<(), EchoLockError> {
        self.transition(id, SwitchState::Paused)
    }

    pub fn resume(&mut self, id: SwitchId) -> Result<(), EchoLockError> {
        self.transition(id, SwitchState::Armed)
    }

    /// Transition to `CANCELLED` and publish a cancellation heartbeat
    /// with a sentinel threshold of 0 so guardians unenroll. Allowed
    /// from any state except `RELEASED`.
    pub async fn cancel(&mut self, sk: &SecretScalar, id: SwitchId, now: Timestamp) -> Result<(), EchoLockError> {
        let switch = self
            .switches
            .get(&id)
            .ok_or_else(|| EchoLockError::SwitchNotFound(id.to_hex()))?;
        switch.state.validate_transition(SwitchState::Cancelled)?;
        let guardians: Vec<XOnlyPublicKey> =
            switch.shares.iter().map(|s| s.guardian_pubkey).collect();
        let owner_pubkey = switch.owner_pubkey;
        let heartbeat = build_heartbeat(
            sk,
            owner_pubkey,
            id,
            now,
            CANCEL_SENTINEL_THRESHOLD_SECONDS,
            &guardians,
        );
        if let Err(e) = self.relay.publish(&heartbeat, self.min_relay_success).await {
            warn!(switch = %id, error = %e, "cancellation heartbeat publish failed");
        }
        let switch = self.switches.get_mut(&id).expect("checked above");
        switch.transition(SwitchState::Cancelled)?;
        self.persist()?;
        Ok(())
    }

    fn transition(&mut self, id: SwitchId, to: SwitchState) -> Result<(), EchoLockError> {
        let switch = self
            .switches
            .get_mut(&id)
            .ok_or_else(|| EchoLockError::SwitchNotFound(id.to_hex()))?;
        switch.transition(to)?;
        self.persist()
    }

    pub fn status(&self, id: SwitchId, now: Timestamp) -> Result<SwitchStatus, EchoLockError> {
        let switch = self
            .switches
            .get(&id)
            .ok_or_else(|| EchoLockError::SwitchNotFound(id.to_hex()))?;
        let next_due = switch.last_heartbeat + switch.check_in_seconds;
        Ok(SwitchStatus {
            id: switch.id.to_hex(),
            title: switch.title.clone(),
            state: switch.state.to_string(),
            time_remaining_seconds: (next_due - now).max(0),
            next_heartbeat_due: next_due,
            timelock: switch.timelock.clone(),
        })
    }

    pub fn list(&self) -> Vec<SwitchId> {
        self.switches.keys().copied().collect()
    }

    /// Remove a switch's local record entirely. Does not retract
    /// already-published relay events — those age out on their own per
    /// the relay's retention policy.
    pub fn delete(&mut self, id: SwitchId) -> Result<(), EchoLockError> {
        self.switches
            .remove(&id)
            .ok_or_else(|| EchoLockError::SwitchNotFound(id.to_hex()))?;
        self.persist()
    }

    /// Record that a timelock commitment was built alongside a switch.
    /// The wrapped signing key and script live outside this struct
    /// (persisted separately by the caller); only the public address
    /// and locktime height are kept here for `status()`.
    pub fn attach_timelock(&mut self, id: SwitchId, timelock: TimelockRef) -> Result<(), EchoLockError> {
        let switch = self
            .switches
            .get_mut(&id)
            .ok_or_else(|| EchoLockError::SwitchNotFound(id.to_hex()))?;
        switch.timelock = Some(timelock);
        self.persist()
    }

    /// Observe that a switch's expiry has elapsed and mark it
    /// `TRIGGERED`. The transition to `RELEASED` happens separately
    /// once a quorum of guardian release events is observed.
    pub fn mark_triggered(&mut self, id: SwitchId) -> Result<(), EchoLockError> {
        self.transition(id, SwitchState::Triggered)
    }

    pub fn mark_released(&mut self, id: SwitchId) -> Result<(), EchoLockError> {
        self.transition(id, SwitchState::Released)
    }

    /// Rebuild the key from locally stored shares only (no network)
    /// and return the plaintext. Never alters state. Used only for
    /// verification when the caller already holds the cleartext
    /// shares out of band (the coordinator itself never persists
    /// them).
    pub fn test_release(
        &self,
        id: SwitchId,
        shares: &[echolock_crypto::Share],
        aad: &[u8],
    ) -> Result<Vec<u8>, EchoLockError> {
        let switch = self
            .switches
            .get(&id)
            .ok_or_else(|| EchoLockError::SwitchNotFound(id.to_hex()))?;
        let mut key_bytes = echolock_crypto::combine(shares)?;
        if key_bytes.len() != echolock_core::AEAD_KEY_LEN {
            return Err(EchoLockError::IntegrityFailure);
        }
        let mut key = [0u8; echolock_core::AEAD_KEY_LEN];
        key.copy_from_slice(&key_bytes);
        let mut ciphertext_with_tag = switch.envelope.ciphertext.clone();
        ciphertext_with_tag.extend_from_slice(&switch.envelope.tag);
        let plaintext = echolock_crypto::decrypt(&key, &switch.envelope.iv, aad, &ciphertext_with_tag)?;
        echolock_crypto::wipe_key(&mut key);
        key_bytes.iter_mut().for_each(|b| *b = 0);
        Ok(plaintext)
    }

    /// Retrieve release events (kind 30080) for `id` published by
    /// guardians, for `status()` callers that want to confirm release
    /// progress.
    pub async fn fetch_release_events(&mut self, id: SwitchId) -> Result<Vec<Event>, EchoLockError> {
        let filter = Filter::new()
            .kind(echolock_core::KIND_SHARE_RELEASE)
            .d_tag(format!("{}:", id.to_hex()));
        self.relay.retrieve(&filter).await
    }
}

/// Wire layout: `[ephemeral_pubkey:32 | version:1 | nonce:32 |
/// ciphertext | mac:32]`, base64-encoded as the event `content`.
fn encode_share_content(encrypted: &echolock_envelope::EncryptedShare) -> String {
    use base64::Engine;
    let mut bytes = Vec::with_capacity(32 + 1 + 32 + encrypted.ciphertext.len() + 32);
    bytes.extend_from_slice(&encrypted.ephemeral_pubkey.0);
    bytes.push(encrypted.version);
    bytes.extend_from_slice(&encrypted.nonce);
    bytes.extend_from_slice(&encrypted.ciphertext);
    bytes.extend_from_slice(&encrypted.mac);
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use echolock_crypto::{derive_public, SecretScalar};
    use echolock_relay::RelayConfig;

    fn temp_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "echolock-coordinator-test-{tag}-{}",
            std::process::id()
        ))
    }

    fn open_coordinator(dir: &PathBuf) -> SwitchCoordinator {
        let relay = RelayNetwork::new(RelayConfig::default());
        SwitchCoordinator::open(dir.clone(), relay, 0).unwrap()
    }

    fn guardian_keys(n: u8) -> Vec<XOnlyPublicKey> {
        (0..n).map(|_| derive_public(&SecretScalar::generate())).collect()
    }

    #[tokio::test]
    async fn create_check_in_and_status_round_trip() {
        let dir = temp_dir("lifecycle");
        let mut coordinator = open_coordinator(&dir);
        let sk = SecretScalar::generate();
        let owner_pubkey = derive_public(&sk);
        let params = BuildParams {
            owner_pubkey,
            created_at: 1_000,
            k: 2,
            n: 2,
            recipients: vec![],
            guardians: guardian_keys(2),
            check_in_seconds: 3_600,
            aad: b"switch-envelope".to_vec(),
        };
        let id = coordinator
            .create(&sk, owner_pubkey, "my switch".into(), b"hello", params, 1_000)
            .await
            .unwrap();

        let status = coordinator.status(id, 1_000).unwrap();
        assert_eq!(status.title, "my switch");
        assert_eq!(status.state, "ARMED");

        coordinator.check_in(&sk, id, 5_000).await.unwrap();
        let status = coordinator.status(id, 5_000).unwrap();
        assert_eq!(status.time_remaining_seconds, 3_600);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn attach_timelock_then_delete() {
        let dir = temp_dir("timelock-delete");
        let mut coordinator = open_coordinator(&dir);
        let sk = SecretScalar::generate();
        let owner_pubkey = derive_public(&sk);
        let params = BuildParams {
            owner_pubkey,
            created_at: 1_000,
            k: 2,
            n: 2,
            recipients: vec![],
            guardians: guardian_keys(2),
            check_in_seconds: 3_600,
            aad: vec![],
        };
        let id = coordinator
            .create(&sk, owner_pubkey, "t".into(), b"hello", params, 1_000)
            .await
            .unwrap();

        coordinator
            .attach_timelock(
                id,
                TimelockRef {
                    address: "bcrt1qexampleaddress".into(),
                    locktime_height: 900_000,
                },
            )
            .unwrap();
        let status = coordinator.status(id, 1_000).unwrap();
        assert_eq!(status.timelock.unwrap().locktime_height, 900_000);

        coordinator.delete(id).unwrap();
        assert!(matches!(
            coordinator.status(id, 1_000).unwrap_err(),
            EchoLockError::SwitchNotFound(_)
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn pause_resume_and_cancel_follow_the_state_machine() {
        let dir = temp_dir("state-machine");
        let mut coordinator = open_coordinator(&dir);
        let sk = SecretScalar::generate();
        let owner_pubkey = derive_public(&sk);
        let params = BuildParams {
            owner_pubkey,
            created_at: 1_000,
            k: 2,
            n: 2,
            recipients: vec![],
            guardians: guardian_keys(2),
            check_in_seconds: 3_600,
            aad: vec![],
        };
        let id = coordinator
            .create(&sk, owner_pubkey, "t".into(), b"hello", params, 1_000)
            .await
            .unwrap();

        coordinator.pause(id).unwrap();
        assert!(coordinator.check_in(&sk, id, 2_000).await.is_err());
        coordinator.resume(id).unwrap();
        coordinator.check_in(&sk, id, 5_000).await.unwrap();

        coordinator.cancel(&sk, id, 6_000).await.unwrap();
        assert_eq!(coordinator.status(id, 6_000).unwrap().state, "CANCELLED");

        let _ = std::fs::remove_dir_all(&dir);
    }

    /// A single loopback mock relay that accepts every publish and hands
    /// back the raw frames it received, so tests can inspect exactly
    /// what `create()` put on the wire.
    async fn spawn_capturing_relay() -> (String, tokio::sync::mpsc::UnboundedReceiver<Event>) {
        use futures::{SinkExt, StreamExt};
        use tokio::net::TcpListener;
        use tokio_tungstenite::tungstenite::Message as WsMessage;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(s) => s,
                    Err(_) => return,
                };
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut ws = match tokio_tungstenite::accept_async(stream).await {
                        Ok(ws) => ws,
                        Err(_) => return,
                    };
                    while let Some(Ok(WsMessage::Text(text))) = ws.next().await {
                        let Ok(echolock_relay::ClientMessage::Publish { event }) =
                            serde_json::from_str(&text)
                        else {
                            continue;
                        };
                        let reply = echolock_relay::RelayMessage::Ok {
                            event_id: event.id,
                            accepted: true,
                            reason: String::new(),
                        };
                        let _ = ws
                            .send(WsMessage::Text(serde_json::to_string(&reply).unwrap()))
                            .await;
                        let _ = tx.send(event);
                    }
                });
            }
        });

        (format!("ws://{addr}"), rx)
    }

    #[tokio::test]
    async fn created_switch_publishes_share_with_real_threshold_seconds() {
        let dir = temp_dir("threshold-tags");
        let (url, mut captured) = spawn_capturing_relay().await;
        let relay = RelayNetwork::new(RelayConfig::from_urls(vec![url]));
        let mut coordinator = SwitchCoordinator::open(dir.clone(), relay, 1).unwrap();

        let sk = SecretScalar::generate();
        let owner_pubkey = derive_public(&sk);
        let check_in_seconds = 9_000i64;
        let params = BuildParams {
            owner_pubkey,
            created_at: 1_000,
            k: 1,
            n: 1,
            recipients: vec![],
            guardians: guardian_keys(1),
            check_in_seconds,
            aad: b"switch-envelope".to_vec(),
        };
        coordinator
            .create(&sk, owner_pubkey, "t".into(), b"hello", params, 1_000)
            .await
            .unwrap();

        let share_event = loop {
            let event = captured.recv().await.unwrap();
            if event.kind == echolock_core::KIND_SHARE_STORAGE {
                break event;
            }
        };

        let threshold_hours: f64 = share_event
            .tags
            .iter()
            .find(|t| t.first().map(|s| s.as_str()) == Some("threshold_hours"))
            .and_then(|t| t.get(1))
            .and_then(|v| v.parse().ok())
            .unwrap();
        let decoded_seconds = (threshold_hours * 3_600.0) as i64;
        assert_eq!(decoded_seconds, check_in_seconds);

        let _ = std::fs::remove_dir_all(&dir);
    }
}

fn share_storage_tags(
    switch_id: SwitchId,
    index: u8,
    encrypted: &echolock_envelope::EncryptedShare,
    check_in_seconds: i64,
    recipients: &[XOnlyPublicKey],
) -> Vec<Vec<String>> {
    let mut tags = vec![
        vec!["p".to_string(), encrypted.guardian_pubkey.to_hex()],
        vec!["d".to_string(), format!("{}:{}", switch_id.to_hex(), index)],
        vec![
            "threshold_hours".to_string(),
            (check_in_seconds as f64 / 3_600.0).to_string(),
        ],
    ];
    for r in recipients {
        tags.push(vec!["recipient".to_string(), r.to_hex()]);
    }
    tags
}
