use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use echolock_core::{EchoLockError, SwitchId, Timestamp, XOnlyPublicKey};
use echolock_envelope::EncryptedShare;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One guardian's holding for a single switch: the encrypted share it
/// was handed, the owner it belongs to, and the heartbeat watermark
/// driving the release test. Never holds cleartext key material.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GuardianRecord {
    pub switch_id: SwitchId,
    pub share_index: u8,
    pub owner_pubkey: XOnlyPublicKey,
    pub threshold_seconds: i64,
    pub encrypted_share: EncryptedShare,
    pub recipient_pubkeys: Vec<XOnlyPublicKey>,
    pub last_heartbeat_seen: Timestamp,
    pub enrolled_at: Timestamp,
    pub released: bool,
    pub released_at: Option<Timestamp>,
}

impl GuardianRecord {
    /// Whether the release test fires at `now`, given `grace` seconds
    /// beyond `threshold_seconds`.
    pub fn is_overdue(&self, now: Timestamp, grace: i64) -> bool {
        !self.released && now - self.last_heartbeat_seen > self.threshold_seconds + grace
    }

    pub fn observe_heartbeat(&mut self, issued_at: Timestamp) {
        self.last_heartbeat_seen = self.last_heartbeat_seen.max(issued_at);
    }

    pub fn mark_released(&mut self, now: Timestamp) {
        self.released = true;
        self.released_at = Some(now);
    }
}

/// Atomic JSON-file persistence for the guardian's record table,
/// keyed by `(switch_id, share_index)`. Same temp-file-then-rename
/// discipline as the coordinator's switch store.
pub struct RecordStore {
    path: PathBuf,
}

impl RecordStore {
    pub fn open(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join("guardian"),
        }
    }

    pub fn load(&self) -> Result<HashMap<(SwitchId, u8), GuardianRecord>, EchoLockError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let bytes = fs::read(&self.path)?;
        if bytes.is_empty() {
            return Ok(HashMap::new());
        }
        let table: Vec<GuardianRecord> = serde_json::from_slice(&bytes)?;
        Ok(table
            .into_iter()
            .map(|r| ((r.switch_id, r.share_index), r))
            .collect())
    }

    pub fn save(&self, records: &HashMap<(SwitchId, u8), GuardianRecord>) -> Result<(), EchoLockError> {
        let table: Vec<&GuardianRecord> = records.values().collect();
        let bytes = serde_json::to_vec_pretty(&table)?;

        let tmp_path = self.path.with_extension("tmp");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        {
            let mut tmp_file = fs::File::create(&tmp_path)?;
            tmp_file.write_all(&bytes)?;
            tmp_file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        debug!(path = %self.path.display(), count = records.len(), "persisted guardian records");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(switch_id: SwitchId, share_index: u8) -> GuardianRecord {
        GuardianRecord {
            switch_id,
            share_index,
            owner_pubkey: XOnlyPublicKey([7u8; 32]),
            threshold_seconds: 3_600,
            encrypted_share: EncryptedShare {
                guardian_pubkey: XOnlyPublicKey([8u8; 32]),
                share_index,
                k: 2,
                n: 3,
                version: 2,
                nonce: [0u8; 32],
                ciphertext: vec![1, 2, 3],
                mac: [0u8; 32],
            },
            recipient_pubkeys: vec![],
            last_heartbeat_seen: 1_000,
            enrolled_at: 1_000,
            released: false,
            released_at: None,
        }
    }

    #[test]
    fn overdue_requires_grace_elapsed() {
        let r = sample(SwitchId::from_bytes([1u8; 16]), 1);
        assert!(!r.is_overdue(1_000 + 3_600 + 100, 3_600));
        assert!(r.is_overdue(1_000 + 3_600 + 3_601, 3_600));
    }

    #[test]
    fn released_record_never_overdue_again() {
        let mut r = sample(SwitchId::from_bytes([1u8; 16]), 1);
        r.mark_released(5_000);
        assert!(!r.is_overdue(999_999, 0));
    }

    #[test]
    fn save_then_load_round_trip() {
        let dir = std::env::temp_dir().join(format!("echolock-guardian-test-{}", std::process::id()));
        let store = RecordStore::open(&dir);
        let mut table = HashMap::new();
        let r = sample(SwitchId::from_bytes([2u8; 16]), 1);
        table.insert((r.switch_id, r.share_index), r);
        store.save(&table).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn heartbeat_watermark_is_monotonic() {
        let mut r = sample(SwitchId::from_bytes([1u8; 16]), 1);
        r.observe_heartbeat(2_000);
        assert_eq!(r.last_heartbeat_seen, 2_000);
        r.observe_heartbeat(1_500);
        assert_eq!(r.last_heartbeat_seen, 2_000);
    }
}
