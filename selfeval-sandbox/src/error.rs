use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Conditions that make further judging meaningless.
///
/// Everything else that can go wrong with a sandboxed run is reported as a
/// `fail` verdict instead.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("cannot locate executable {0:?}")]
    Unresolved(PathBuf),

    #[error("failed to spawn isolation helper {}: {source}", .helper.display())]
    Spawn {
        helper: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("isolation helper did not stop within {0:?}")]
    StartTimeout(Duration),

    #[error("interrupted ({})", .notes.join("; "))]
    Interrupted { notes: Vec<String> },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Os(#[from] nix::Error),
}

pub type Result<T, E = SandboxError> = std::result::Result<T, E>;
