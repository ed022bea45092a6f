use std::io;

use thiserror::Error;

/// Errors reported by constructors and installers.
///
/// The logging hot path and the crash path never return these; they are
/// configuration-time failures only.
#[derive(Debug, Error)]
pub enum Error {
    #[error("line buffer capacity must exceed 1 byte, got {0}")]
    InvalidCapacity(usize),

    #[error("failed to reserve a {0} byte line buffer")]
    Allocation(usize),

    #[error("already installed for this process")]
    AlreadyInstalled,

    #[error("failed to install handler for signal {signal}")]
    SignalInstall {
        signal: i32,
        #[source]
        source: io::Error,
    },

    #[error("invalid log level {0:?}")]
    InvalidLevel(String),

    #[error("invalid configuration value for {key}: {value:?}")]
    InvalidConfig { key: &'static str, value: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
