pub mod builder;
pub mod types;
pub mod wrap;

pub use builder::build;
pub use types::{
    BuildParams, BuildTranscript, EncryptedShare, Envelope, ALGORITHM_CHACHA20_POLY1305,
    ENVELOPE_VERSION,
};
