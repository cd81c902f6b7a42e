use std::error::Error as StdError;
use std::path::PathBuf;

use thiserror::Error;

use crate::driver::DriverError;

/// Mixdown's crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Control-plane errors surfaced to service callers.
///
/// Only control operations (`initialize`, `play_*`) report errors. Failures
/// on the data plane (a voice's decoder or converter breaking mid-stream, a
/// device push or queue query failing during a tick) are deliberately not
/// represented here: they are logged, confined to the voice or the tick, and
/// never raised to the caller.
#[derive(Debug, Error)]
pub enum Error {
    /// A control call arrived before `initialize` (or after `shutdown`).
    #[error("audio service is not initialized")]
    NotInitialized,

    /// Bringing up the platform audio subsystem failed.
    #[error("failed to initialize audio subsystem: {0}")]
    SubsystemInit(#[source] DriverError),

    /// The output device stream could not be opened.
    #[error("failed to open audio device stream: {0}")]
    OpenDevice(#[source] DriverError),

    /// The device stream opened but refused to start consuming.
    #[error("failed to start audio device stream: {0}")]
    ResumeDevice(#[source] DriverError),

    /// A voice could not be created: decoder open, track probing, or
    /// converter creation failed. No voice is installed when this is
    /// returned.
    #[error("failed to load audio source {path:?}: {source}")]
    Load {
        path: PathBuf,
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    pub(crate) fn load(path: impl Into<PathBuf>, source: anyhow::Error) -> Self {
        Self::Load {
            path: path.into(),
            source: source.into(),
        }
    }
}
