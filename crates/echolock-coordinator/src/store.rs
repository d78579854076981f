use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use echolock_core::{EchoLockError, SwitchId};
use tracing::debug;

use crate::switch::Switch;

/// Atomic JSON-file persistence for the switch aggregate table. Every
/// write goes through a temp file in the same directory, flushed and
/// synced, then renamed into place — the rename is what makes a crash
/// mid-write leave the previous file intact rather than a half-written
/// one.
pub struct SwitchStore {
    path: PathBuf,
}

impl SwitchStore {
    pub fn open(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join("switches"),
        }
    }

    pub fn load(&self) -> Result<HashMap<SwitchId, Switch>, EchoLockError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let bytes = fs::read(&self.path)?;
        if bytes.is_empty() {
            return Ok(HashMap::new());
        }
        let table: HashMap<String, Switch> = serde_json::from_slice(&bytes)?;
        let mut out = HashMap::with_capacity(table.len());
        for (id_hex, switch) in table {
            let id = SwitchId::from_hex(&id_hex)
                .map_err(|e| EchoLockError::Other(format!("corrupt switch id {id_hex}: {e}")))?;
            out.insert(id, switch);
        }
        Ok(out)
    }

    pub fn save(&self, switches: &HashMap<SwitchId, Switch>) -> Result<(), EchoLockError> {
        let as_hex: HashMap<String, &Switch> =
            switches.iter().map(|(id, s)| (id.to_hex(), s)).collect();
        let bytes = serde_json::to_vec_pretty(&as_hex)?;

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
        debug!(path = %self.path.display(), count = switches.len(), "persisted switch store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::switch::SwitchState;
    use echolock_core::XOnlyPublicKey;
    use echolock_envelope::Envelope;

    fn sample_switch() -> Switch {
        Switch {
            id: SwitchId::from_bytes([1u8; 16]),
            owner_pubkey: XOnlyPublicKey([2u8; 32]),
            title: "test".into(),
            created_at: 1_000,
            check_in_seconds: 3_600,
            last_heartbeat: 1_000,
            check_in_count: 0,
            state: SwitchState::Armed,
            envelope: Envelope {
                version: 1,
                algorithm_id: 1,
                iv: [0u8; 12],
                tag: [0u8; 16],
                ciphertext: vec![1, 2, 3],
            },
            shares: vec![],
            timelock: None,
            recipients: vec![],
        }
    }

    #[test]
    fn save_then_load_round_trip() {
        let dir = std::env::temp_dir().join(format!("echolock-store-test-{}", std::process::id()));
        let store = SwitchStore::open(&dir);
        let mut table = HashMap::new();
        let s = sample_switch();
        table.insert(s.id, s.clone());
        store.save(&table).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.get(&s.id).unwrap().title, "test");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
