//! Error types shared by the control loops.

use crate::ports::PortError;
use thiserror::Error;

/// Failures that unwind a worker loop.
///
/// Everything else — transient I/O hiccups, malformed frames, rejected
/// control pages — is absorbed inside the loops per the error taxonomy.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("transport failure: {0}")]
    Port(#[from] PortError),

    #[error("ANT channel setup failed after {attempts} attempts")]
    ChannelSetup { attempts: u32 },

    #[error("shutdown requested before setup completed")]
    Cancelled,
}
