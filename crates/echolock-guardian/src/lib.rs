//! echolock-guardian
//!
//! The guardian side of the protocol: holds one encrypted share per
//! enrolled switch, tracks heartbeats from the owners it watches, and
//! runs the release test that re-encrypts and publishes the share to
//! each recipient once a switch goes quiet for too long.

pub mod daemon;
pub mod record;

pub use daemon::GuardianDaemon;
pub use record::{GuardianRecord, RecordStore};
