use std::io;

use thiserror::Error;

/// Main error type for corescan
#[derive(Debug, Error)]
pub enum CorescanError {
    /// An OS call to change thread affinity failed
    #[error("Affinity error: {message}")]
    Affinity { message: String },

    /// A powersave mode outside {0, 1, 2} was requested
    #[error("Invalid powersave mode: {mode}")]
    InvalidPowersaveMode { mode: i32 },

    /// A capability probe could not run at all
    #[error("Probe error: {message}")]
    Probe { message: String },

    /// Invalid argument provided
    #[error("Invalid argument: {argument}")]
    InvalidArgument { argument: String },

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CorescanError {
    /// Create an affinity error
    pub fn affinity(message: impl Into<String>) -> Self {
        CorescanError::Affinity {
            message: message.into(),
        }
    }

    /// Create an affinity error from the last OS error
    pub fn affinity_os(call: &str) -> Self {
        CorescanError::Affinity {
            message: format!("{call}: {}", io::Error::last_os_error()),
        }
    }

    /// Create a probe error
    pub fn probe(message: impl Into<String>) -> Self {
        CorescanError::Probe {
            message: message.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(argument: impl Into<String>) -> Self {
        CorescanError::InvalidArgument {
            argument: argument.into(),
        }
    }

    /// Create an invalid powersave mode error
    pub fn invalid_powersave_mode(mode: i32) -> Self {
        CorescanError::InvalidPowersaveMode { mode }
    }
}

/// Result type alias for corescan operations
pub type Result<T> = std::result::Result<T, CorescanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CorescanError::affinity("sched_setaffinity failed");
        assert!(err.to_string().contains("sched_setaffinity failed"));
        assert!(matches!(err, CorescanError::Affinity { .. }));
    }

    #[test]
    fn test_error_creation_helpers() {
        let err = CorescanError::invalid_powersave_mode(3);
        assert!(matches!(
            err,
            CorescanError::InvalidPowersaveMode { mode } if mode == 3
        ));

        let err = CorescanError::probe("no cpuinfo");
        assert!(matches!(err, CorescanError::Probe { message } if message == "no cpuinfo"));

        let err = CorescanError::invalid_argument("--tier");
        assert!(matches!(err, CorescanError::InvalidArgument { argument } if argument == "--tier"));
    }
}
