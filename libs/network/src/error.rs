//! Protocol Error Types
//!
//! Three layers of failure, each with its own enum:
//! - [`TransportError`]: byte movement (sockets, framing, timeouts)
//! - [`DispatchError`]: scheduling work onto the dispatch thread
//! - [`ChannelError`]: everything a command, token or listener can observe
//!
//! Channel errors are delivered to every outstanding token when a channel
//! closes, so they must be cheap to clone. Transport errors keep their
//! source for logging but drop it when cloned.

use codec::CodecError;
use std::net::SocketAddr;
use thiserror::Error;

/// Byte-level transport failures
#[derive(Error, Debug)]
pub enum TransportError {
    /// Socket level connectivity errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Connection establishment errors
    #[error("Connection error: {message} (remote: {remote_addr:?})")]
    Connection {
        message: String,
        remote_addr: Option<SocketAddr>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Framing violations: oversized or truncated messages
    #[error("Framing error: {message}")]
    Framing { message: String },

    /// Peer closed the transport or it was closed locally
    #[error("Transport closed: {reason}")]
    Closed { reason: String },

    /// Operation exceeded its deadline
    #[error("Timeout error: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Generic I/O errors
    #[error("I/O error: {message}")]
    Io {
        message: String,
        source: std::io::Error,
    },
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    pub fn network_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn connection_with_source(
        message: impl Into<String>,
        remote_addr: Option<SocketAddr>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            remote_addr,
            source: Some(Box::new(source)),
        }
    }

    pub fn framing(message: impl Into<String>) -> Self {
        Self::Framing {
            message: message.into(),
        }
    }

    pub fn closed(reason: impl Into<String>) -> Self {
        Self::Closed {
            reason: reason.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Map a read/write failure, treating EOF and resets as a clean close
    pub fn from_io(operation: &str, error: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match error.kind() {
            ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe => Self::closed(format!("{operation}: {error}")),
            _ => Self::Io {
                message: operation.to_string(),
                source: error,
            },
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::Connection { .. } => "connection",
            Self::Framing { .. } => "framing",
            Self::Closed { .. } => "closed",
            Self::Timeout { .. } => "timeout",
            Self::Io { .. } => "io",
        }
    }
}

// Box<dyn Error> and io::Error are not Clone; clones keep the message only
impl Clone for TransportError {
    fn clone(&self) -> Self {
        match self {
            Self::Network { message, .. } => Self::Network {
                message: message.clone(),
                source: None,
            },
            Self::Connection {
                message,
                remote_addr,
                ..
            } => Self::Connection {
                message: message.clone(),
                remote_addr: *remote_addr,
                source: None,
            },
            Self::Framing { message } => Self::Framing {
                message: message.clone(),
            },
            Self::Closed { reason } => Self::Closed {
                reason: reason.clone(),
            },
            Self::Timeout {
                operation,
                timeout_ms,
            } => Self::Timeout {
                operation: operation.clone(),
                timeout_ms: *timeout_ms,
            },
            Self::Io { message, source } => Self::Network {
                message: format!("{message}: {source}"),
                source: None,
            },
        }
    }
}

/// Failures scheduling work on the dispatch thread
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Blocking wait requested from the dispatch thread itself
    #[error("invoke_and_wait called on the dispatch thread would deadlock")]
    WouldDeadlock,

    /// Dispatcher no longer accepts work
    #[error("Dispatcher {name} has shut down")]
    Shutdown { name: String },

    /// Submitted work panicked
    #[error("Dispatched work panicked: {message}")]
    Panicked { message: String },

    /// Dispatch thread or its runtime could not be created
    #[error("Failed to start dispatcher: {message}")]
    Startup { message: String },
}

/// Errors observed by commands, tokens and channel listeners
#[derive(Error, Debug, Clone)]
pub enum ChannelError {
    /// Operation on a channel that is not (or no longer) open
    #[error("Channel is not connected")]
    NotConnected,

    /// Channel closed while the operation was outstanding
    #[error("Channel closed: {reason}")]
    Closed { reason: String },

    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("Codec failure: {0}")]
    Codec(#[from] CodecError),

    /// Command withdrawn before it reached the transport
    #[error("Command cancelled")]
    Cancelled,

    /// Remote side has no handler for the service or command
    #[error("Command not recognized: {service}.{command}")]
    CommandNotRecognized { service: String, command: String },

    /// Frame violated the protocol grammar
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// State-mutating call made off the dispatch thread
    #[error("Operation must be performed on the dispatch thread")]
    NotDispatchThread,

    #[error("Dispatch failure: {0}")]
    Dispatch(#[from] DispatchError),

    /// Error report returned by the remote command handler
    #[error("Remote error {code}: {message}")]
    Remote { code: i64, message: String },
}

impl ChannelError {
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::Closed {
            reason: reason.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn remote(code: i64, message: impl Into<String>) -> Self {
        Self::Remote {
            code,
            message: message.into(),
        }
    }

    /// True when the error ended the whole channel rather than one command
    pub fn is_channel_fatal(&self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::Closed { .. }
                | Self::Transport(_)
                | Self::Protocol { .. }
        )
    }
}

/// Configuration loading failures
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config_crate::ConfigError),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("Invalid configuration value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

/// Discovery packet and peer attribute failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("Malformed discovery packet: {reason}")]
    MalformedPacket { reason: String },

    #[error("Unknown discovery packet code {code}")]
    UnknownCode { code: u8 },

    #[error("Peer attributes missing required key {key}")]
    MissingAttribute { key: &'static str },
}

impl DiscoveryError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedPacket {
            reason: reason.into(),
        }
    }
}
