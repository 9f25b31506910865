//! Errors of the device and replay layers.

use std::io;
use std::path::PathBuf;

use evemu_parser::ParseError;
use thiserror::Error;

/// Failure to acquire something a command needs: a file, a device node, a registration.
/// Reported once, never retried.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("error {} opening {}: {source}", source.raw_os_error().unwrap_or(0), path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to look at {}: {source}", path.display())]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not create device: {0}")]
    Registration(#[source] io::Error),

    #[error("could not parse the device description")]
    Parse(#[source] ParseError),

    #[error("could not rewind {}: {source}", path.display())]
    Rewind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not link the device node: {0}")]
    Symlink(#[source] io::Error),
}

/// Failure in the middle of a replay session. The session is aborted: a partially injected
/// event stream can leave the device in an inconsistent input state.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed writing event {index} to the device: {source}")]
    Write {
        index: usize,
        #[source]
        source: io::Error,
    },

    #[error("short write for event {index}: {written} of {expected} bytes")]
    ShortWrite {
        index: usize,
        written: usize,
        expected: usize,
    },

    #[error("could not read the recording")]
    Source(#[from] ParseError),
}

/// Outcome of a command that failed either while setting up or while replaying.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error("could not replay device: {0}")]
    Replay(#[from] ReplayError),
}
