use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Failure classes a caller can branch on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Precondition,
    Io,
    Format,
    Integrity,
    Network,
    Cancelled,
    Consistency,
    Unexpected,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Precondition => "precondition",
            Self::Io => "io",
            Self::Format => "format",
            Self::Integrity => "integrity",
            Self::Network => "network",
            Self::Cancelled => "cancelled",
            Self::Consistency => "consistency",
            Self::Unexpected => "unexpected",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum BootstrapError {
    Precondition(String),
    Io {
        action: &'static str,
        path: PathBuf,
        source: io::Error,
    },
    Format(String),
    Integrity(String),
    Network(String),
    Cancelled,
    Consistency(String),
    Unexpected(String),
}

impl BootstrapError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BootstrapError::Precondition(_) => ErrorKind::Precondition,
            BootstrapError::Io { .. } => ErrorKind::Io,
            BootstrapError::Format(_) => ErrorKind::Format,
            BootstrapError::Integrity(_) => ErrorKind::Integrity,
            BootstrapError::Network(_) => ErrorKind::Network,
            BootstrapError::Cancelled => ErrorKind::Cancelled,
            BootstrapError::Consistency(_) => ErrorKind::Consistency,
            BootstrapError::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    pub fn io(action: &'static str, path: &Path, source: io::Error) -> Self {
        BootstrapError::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Builds a `map_err` adapter that attributes an io error to `path`.
    pub fn io_at<'a>(
        action: &'static str,
        path: &'a Path,
    ) -> impl (FnOnce(io::Error) -> Self) + 'a {
        move |source| Self::io(action, path, source)
    }
}

impl fmt::Display for BootstrapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapError::Precondition(message) => write!(f, "{message}"),
            BootstrapError::Io {
                action,
                path,
                source,
            } => write!(f, "failed to {action} {}: {source}", path.display()),
            BootstrapError::Format(message) => write!(f, "{message}"),
            BootstrapError::Integrity(message) => write!(f, "{message}"),
            BootstrapError::Network(message) => write!(f, "{message}"),
            BootstrapError::Cancelled => write!(f, "bootstrap cancelled by user"),
            BootstrapError::Consistency(message) => write!(f, "{message}"),
            BootstrapError::Unexpected(message) => write!(f, "unexpected error: {message}"),
        }
    }
}

impl std::error::Error for BootstrapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BootstrapError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Cloneable record of a failed run, kept by the controller and sent to observers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&BootstrapError> for RunError {
    fn from(err: &BootstrapError) -> Self {
        RunError {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<BootstrapError> for RunError {
    fn from(err: BootstrapError) -> Self {
        RunError::from(&err)
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RunError {}
