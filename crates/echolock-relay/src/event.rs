use echolock_core::{EventId, SchnorrSignature, XOnlyPublicKey, HEARTBEAT_D_TAG_PREFIX};
use echolock_crypto::{schnorr_sign, schnorr_verify, sha256_digest, SecretScalar};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A signed relay event, per the wire protocol's `{id, pubkey,
/// created_at, kind, tags, content, sig}` structure.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub pubkey: XOnlyPublicKey,
    pub created_at: i64,
    pub kind: u32,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: SchnorrSignature,
}

impl Event {
    /// Compute the canonical id: sha256 over `[0, pubkey, created_at,
    /// kind, tags, content]`.
    pub fn canonical_id(
        pubkey: &XOnlyPublicKey,
        created_at: i64,
        kind: u32,
        tags: &[Vec<String>],
        content: &str,
    ) -> [u8; 32] {
        let arr = Value::Array(vec![
            Value::from(0),
            Value::String(pubkey.to_hex()),
            Value::from(created_at),
            Value::from(kind),
            serde_json::to_value(tags).expect("tags is always serialisable"),
            Value::String(content.to_string()),
        ]);
        let canonical =
            serde_json::to_vec(&arr).expect("canonical array form is always serialisable");
        sha256_digest(&canonical)
    }

    /// Build and sign a new event under `sk`.
    pub fn build(
        sk: &SecretScalar,
        pubkey: XOnlyPublicKey,
        created_at: i64,
        kind: u32,
        tags: Vec<Vec<String>>,
        content: String,
    ) -> Self {
        let id_bytes = Self::canonical_id(&pubkey, created_at, kind, &tags, &content);
        let sig = schnorr_sign(sk, &id_bytes);
        Event {
            id: EventId(id_bytes),
            pubkey,
            created_at,
            kind,
            tags,
            content,
            sig,
        }
    }

    /// Verify both that `id` matches the canonical recomputation and
    /// that `sig` verifies under `pubkey`.
    pub fn verify(&self) -> bool {
        let recomputed =
            Self::canonical_id(&self.pubkey, self.created_at, self.kind, &self.tags, &self.content);
        if recomputed != self.id.0 {
            return false;
        }
        schnorr_verify(&self.pubkey, &self.id.0, &self.sig)
    }

    /// Value of the mandatory `d` tag, if present.
    pub fn d_tag(&self) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(|s| s.as_str()) == Some("d"))
            .and_then(|t| t.get(1))
            .map(|s| s.as_str())
    }

    /// All `p` tag values (intended readers).
    pub fn p_tags(&self) -> Vec<&str> {
        self.tags
            .iter()
            .filter(|t| t.first().map(|s| s.as_str()) == Some("p"))
            .filter_map(|t| t.get(1))
            .map(|s| s.as_str())
            .collect()
    }
}

/// Normalise a heartbeat `d` tag value to the prefixed form, accepting
/// either the prefixed form or a bare switch-id on read.
pub fn normalize_heartbeat_d_tag(switch_id_hex: &str) -> String {
    format!("{HEARTBEAT_D_TAG_PREFIX}{switch_id_hex}")
}

/// Extract the bare switch-id from a heartbeat `d` tag that may or may
/// not carry the prefix.
pub fn strip_heartbeat_d_tag_prefix(d_tag: &str) -> &str {
    d_tag
        .strip_prefix(HEARTBEAT_D_TAG_PREFIX)
        .unwrap_or(d_tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use echolock_crypto::derive_public;

    #[test]
    fn sign_and_verify_round_trip() {
        let sk = SecretScalar::generate();
        let pk = derive_public(&sk);
        let event = Event::build(&sk, pk, 1_700_000_000, 30078, vec![], "content".into());
        assert!(event.verify());
    }

    #[test]
    fn bit_flip_in_content_invalidates_signature() {
        let sk = SecretScalar::generate();
        let pk = derive_public(&sk);
        let mut event = Event::build(&sk, pk, 1_700_000_000, 30078, vec![], "content".into());
        event.content.push('!');
        assert!(!event.verify());
    }

    #[test]
    fn d_tag_normalization_round_trips() {
        let normalized = normalize_heartbeat_d_tag("abcd");
        assert_eq!(normalized, "echolock-heartbeat-abcd");
        assert_eq!(strip_heartbeat_d_tag_prefix(&normalized), "abcd");
        assert_eq!(strip_heartbeat_d_tag_prefix("abcd"), "abcd");
    }
}
