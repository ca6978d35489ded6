use crate::encoding::Encoding;
use std::io;

/// Convenience alias used by every fallible operation in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while building, running or piping commands.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The process ran and exited with a non-zero status.
    ///
    /// Raised by [`Command::raise_for_returncode`](crate::Command::raise_for_returncode)
    /// or automatically when the command's raise mode is on. Captured output is
    /// decoded with the command's encoding, falling back to lossy UTF-8; it is
    /// empty for channels streamed to the console.
    #[error("`{program}` exited with status {returncode}")]
    Command {
        program: String,
        returncode: i32,
        stdout: String,
        stderr: String,
    },

    /// The process could not be started (not found, not executable, ...).
    #[error("failed to launch `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    /// An operation was combined with operands it does not accept.
    #[error("invalid usage: {0}")]
    Usage(String),

    /// An operation was requested in a lifecycle state that does not allow it.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Output bytes are not valid in the command's declared encoding.
    #[error("output is not valid {encoding} (at byte {position})")]
    Decode { encoding: Encoding, position: usize },

    /// Text contains a character the declared encoding cannot represent.
    #[error("{character:?} cannot be encoded as {encoding}")]
    Encode { encoding: Encoding, character: char },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[cfg(unix)]
    #[error("failed to deliver signal: {0}")]
    Signal(#[from] nix::Error),
}

impl Error {
    /// The exit status carried by a [`Error::Command`], if this is one.
    pub fn returncode(&self) -> Option<i32> {
        match self {
            Error::Command { returncode, .. } => Some(*returncode),
            _ => None,
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(inner) => inner,
            other @ (Error::Decode { .. } | Error::Encode { .. }) => {
                io::Error::new(io::ErrorKind::InvalidData, other)
            }
            other => io::Error::other(other),
        }
    }
}
