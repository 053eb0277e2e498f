//! The workspace-wide error type.
//!
//! Every fallible operation in the core returns [`Error`], which pairs an
//! [`ErrorKind`] with a human-readable message and an optional preserved
//! source. The kind is what drives propagation policy: local recovery for
//! buffer/codec hiccups, session teardown for network and protocol failures,
//! process exit for configuration and device initialization failures.

use std::error::Error as StdError;
use std::fmt;

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of an error, used to decide how far it propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Configuration rejected before anything started.
    InvalidConfig,
    /// Audio host or device failure (enumeration, lookup, open).
    AudioDevice,
    /// Failure on the capture path (input stream, encoder).
    AudioCapture,
    /// Failure on the playback path (output stream, decoder).
    AudioPlayback,
    /// Socket-level failure on an established connection.
    Network,
    /// Failure to establish a connection.
    Connection,
    /// Wire-format violation (bad magic, version, sizes, handshake).
    Protocol,
    /// Bounded buffer rejected a write.
    Buffer,
    /// A deadline elapsed.
    Timeout,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidConfig => "InvalidConfig",
            ErrorKind::AudioDevice => "AudioDevice",
            ErrorKind::AudioCapture => "AudioCapture",
            ErrorKind::AudioPlayback => "AudioPlayback",
            ErrorKind::Network => "Network",
            ErrorKind::Connection => "Connection",
            ErrorKind::Protocol => "Protocol",
            ErrorKind::Buffer => "Buffer",
            ErrorKind::Timeout => "Timeout",
        };
        f.write_str(name)
    }
}

impl ErrorKind {
    /// Whether an error of this kind should tear down a running client
    /// session (and, on the client, notify the shutdown coordinator).
    pub fn is_critical(self) -> bool {
        matches!(self, ErrorKind::Network | ErrorKind::Connection)
    }
}

/// An error with a kind, a message, and an optional preserved cause.
pub struct Error {
    kind: ErrorKind,
    message: String,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl Error {
    /// Create an error with no underlying cause.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an underlying error with additional context.
    pub fn wrap(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidConfig, message)
    }

    pub fn audio_device(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AudioDevice, message)
    }

    pub fn audio_capture(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AudioCapture, message)
    }

    pub fn audio_playback(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AudioPlayback, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }

    pub fn buffer(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Buffer, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "[{}] {}: {}", self.kind, self.message, source),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|s| s as &(dyn StdError + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::wrap(ErrorKind::Network, "i/o failure", err)
    }
}
