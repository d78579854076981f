use echolock_core::{EchoLockError, SwitchId, Timestamp, XOnlyPublicKey};
use echolock_envelope::Envelope;
use serde::{Deserialize, Serialize};

/// One entry in a switch's share manifest: index and ciphertext only.
/// The cleartext share never lives here.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShareManifestEntry {
    pub index: u8,
    pub guardian_pubkey: XOnlyPublicKey,
}

/// Reference to an associated timelock commitment, if one was built.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimelockRef {
    pub address: String,
    pub locktime_height: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwitchState {
    Armed,
    Paused,
    Triggered,
    Released,
    Cancelled,
}

impl std::fmt::Display for SwitchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SwitchState::Armed => "ARMED",
            SwitchState::Paused => "PAUSED",
            SwitchState::Triggered => "TRIGGERED",
            SwitchState::Released => "RELEASED",
            SwitchState::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

impl SwitchState {
    /// Validate a transition from `self` to `to`, per the coordinator
    /// state machine. Transitions not listed are prohibited.
    pub fn validate_transition(self, to: SwitchState) -> Result<(), EchoLockError> {
        use SwitchState::*;
        let allowed = matches!(
            (self, to),
            (Armed, Paused)
                | (Paused, Armed)
                | (Armed, Triggered)
                | (Triggered, Released)
                | (Armed, Cancelled)
                | (Paused, Cancelled)
                | (Triggered, Cancelled)
        );
        if allowed {
            Ok(())
        } else {
            Err(EchoLockError::InvalidStateTransition {
                from: format!("{self} -> {to}"),
            })
        }
    }
}

/// The persistent switch aggregate. Secret-bearing fields (symmetric
/// key, cleartext shares, timelock signing key) are never part of this
/// struct — they exist only in memory during build or release.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Switch {
    pub id: SwitchId,
    pub owner_pubkey: XOnlyPublicKey,
    pub title: String,
    pub created_at: Timestamp,
    pub check_in_seconds: i64,
    pub last_heartbeat: Timestamp,
    pub check_in_count: u64,
    pub state: SwitchState,
    pub envelope: Envelope,
    pub shares: Vec<ShareManifestEntry>,
    pub timelock: Option<TimelockRef>,
    pub recipients: Vec<XOnlyPublicKey>,
}

impl Switch {
    pub fn transition(&mut self, to: SwitchState) -> Result<(), EchoLockError> {
        self.state.validate_transition(to)?;
        self.state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn armed_to_paused_and_back() {
        assert!(SwitchState::Armed.validate_transition(SwitchState::Paused).is_ok());
        assert!(SwitchState::Paused.validate_transition(SwitchState::Armed).is_ok());
    }

    #[test]
    fn released_is_terminal() {
        assert!(SwitchState::Released
            .validate_transition(SwitchState::Cancelled)
            .is_err());
        assert!(SwitchState::Released
            .validate_transition(SwitchState::Armed)
            .is_err());
    }

    #[test]
    fn cancel_not_allowed_from_released() {
        assert!(SwitchState::Released
            .validate_transition(SwitchState::Cancelled)
            .is_err());
    }

    #[test]
    fn paused_cannot_trigger_directly() {
        assert!(SwitchState::Paused
            .validate_transition(SwitchState::Triggered)
            .is_err());
    }
}
