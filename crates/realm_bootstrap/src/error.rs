//! Error taxonomy for the bootstrap process.
//!
//! Stages report [`StageError`]s. A failing mandatory stage turns its error
//! into a [`FatalError`], and everything that can end the bootstrap early is
//! collected into [`BootstrapError`], which the binary maps to an exit code.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Process exit status used for every failed startup.
pub const EXIT_FAILURE: i32 = -1;

/// Failure reported by a single initialization stage.
#[derive(Debug, Error)]
pub enum StageError {
    /// Missing or invalid settings, including bad enumerated values
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A data file, script directory or map could not be loaded
    #[error("failed to load {}: {reason}", path.display())]
    ResourceLoad { path: PathBuf, reason: String },

    /// Connection or schema problems with the database
    #[error("database error: {0}")]
    Database(String),

    /// A listener could not be bound; never fatal on its own
    #[error("failed to bind {protocol} listener on port {port}: {source}")]
    NetworkBind {
        protocol: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// A worker refused a task the stage tried to hand over
    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// A mandatory stage failed. The process always terminates after this.
#[derive(Debug, Error)]
#[error("cannot load {stage}: {source}")]
pub struct FatalError {
    /// Name of the stage that failed
    pub stage: String,
    /// What went wrong inside the stage
    #[source]
    pub source: StageError,
}

/// Worker lifecycle violations.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker `{0}` is already running")]
    AlreadyRunning(String),

    #[error("worker `{0}` is not accepting tasks")]
    NotAccepting(String),

    #[error("worker `{0}` must be asked to shut down before it can be joined")]
    NotDraining(String),

    #[error("no worker named `{0}` is registered")]
    Unknown(String),

    #[error("failed to spawn thread for worker `{name}`: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("worker `{0}` thread panicked")]
    Panicked(String),

    #[error("worker `{name}` cannot schedule an event {delay:?} from now")]
    InvalidDelay {
        name: String,
        delay: std::time::Duration,
    },
}

/// The startup handshake could not deliver a result.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("initialization task ended without signaling the handshake")]
    Abandoned,
}

/// Every way the bootstrap can end without serving to completion.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Fatal(#[from] FatalError),

    #[error("No services running. The server is NOT online!")]
    NoServiceRunning,

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error("service loop failed: {0}")]
    Serve(#[source] io::Error),
}

impl BootstrapError {
    /// Exit status the process should terminate with.
    pub fn exit_code(&self) -> i32 {
        EXIT_FAILURE
    }

    /// Whether this error goes through the fatal escalation path (operator
    /// acknowledgement, immediate exit) instead of an orderly shutdown.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BootstrapError::Fatal(_) | BootstrapError::Worker(_) | BootstrapError::Handshake(_)
        )
    }
}
