//! echolock-timelock
//!
//! CLTV-locked Bitcoin commitment as the third, on-chain recovery path:
//! builds a P2WSH script that only the owner can spend, and only after
//! a height-based timelock matures.

pub mod chain;
pub mod commitment;

pub use chain::{Chain, HttpChain, Utxo};
pub use commitment::{build, spend, status, TimelockCommitment, TimelockParams, TimelockStatus, WrappedKey};
