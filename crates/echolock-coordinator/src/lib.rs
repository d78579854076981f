//! echolock-coordinator
//!
//! The owner-side switch lifecycle: envelope construction, the ARMED /
//! PAUSED / TRIGGERED / RELEASED / CANCELLED state machine, heartbeat
//! issuance, and atomic local persistence.

pub mod coordinator;
pub mod heartbeat;
pub mod store;
pub mod switch;

pub use coordinator::{SwitchCoordinator, SwitchStatus};
pub use heartbeat::{build_heartbeat, is_debounced, verify_heartbeat, CANCEL_SENTINEL_THRESHOLD_SECONDS};
pub use store::SwitchStore;
pub use switch::{ShareManifestEntry, Switch, SwitchState, TimelockRef};
