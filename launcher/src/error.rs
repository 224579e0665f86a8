use std::{fmt, io};

pub type Result<T> = std::result::Result<T, LauncherErr>;

/// All errors that can occur while running a cluster.
#[derive(Debug)]
pub enum LauncherErr {
    /// Invalid command line arguments, caught before connecting.
    InvalidArgs(String),
    /// Failed to reach a worker.
    ConnectionFailed { addr: String, source: io::Error },
    /// A worker reported an unrecoverable error.
    WorkerFailed { worker_id: usize, msg: String },
    /// A worker sent a message out of turn.
    UnexpectedMessage {
        worker_id: usize,
        expected: &'static str,
        got: &'static str,
    },
    /// A worker disconnected without reporting its training outcome.
    MissingReport { worker_id: usize },
    /// An in-process worker task panicked or was cancelled.
    Join(String),
    Io(io::Error),
}

impl fmt::Display for LauncherErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgs(msg) => write!(f, "invalid arguments: {msg}"),
            Self::ConnectionFailed { addr, source } => {
                write!(f, "connection failed to {addr}: {source}")
            }
            Self::WorkerFailed { worker_id, msg } => write!(f, "worker {worker_id} error: {msg}"),
            Self::UnexpectedMessage {
                worker_id,
                expected,
                got,
            } => write!(f, "worker {worker_id} sent {got}, expected {expected}"),
            Self::MissingReport { worker_id } => {
                write!(f, "worker {worker_id} disconnected without a report")
            }
            Self::Join(msg) => write!(f, "worker task failed: {msg}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for LauncherErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ConnectionFailed { source, .. } => Some(source),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for LauncherErr {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<LauncherErr> for io::Error {
    fn from(e: LauncherErr) -> Self {
        match e {
            LauncherErr::Io(e) => e,
            LauncherErr::ConnectionFailed { source, .. } => source,
            LauncherErr::InvalidArgs(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            e => io::Error::other(e.to_string()),
        }
    }
}
