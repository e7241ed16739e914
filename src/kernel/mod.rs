//! The only layer that talks to Unix primitives directly: signal routing,
//! credential resolution, process-group control and zombie reaping.

pub mod credentials;
pub mod process_group;
pub mod reaper;
pub mod signal;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("user '{0}' not found")]
    UserNotFound(String),

    #[error("group '{0}' not found")]
    GroupNotFound(String),

    #[error("{0} is not supported on this platform")]
    NotSupported(&'static str),

    #[error("{op} failed: {source}")]
    Os {
        op: &'static str,
        #[source]
        source: nix::Error,
    },
}

impl KernelError {
    pub(crate) fn os(op: &'static str, source: nix::Error) -> Self {
        Self::Os { op, source }
    }

    /// True for the "feature absent on this platform" sentinel, which callers
    /// downgrade to a warning instead of treating as a failure.
    pub fn is_not_supported(&self) -> bool {
        matches!(self, Self::NotSupported(_))
    }
}

/// Whether this daemon runs as PID 1 and therefore inherits orphans natively,
/// making the subreaper flag redundant.
pub fn is_pid_one() -> bool {
    std::process::id() == 1
}
