use std::{error::Error, fmt, io};

use machine_learning::MlErr;

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Failures while reading and decoding record files.
#[derive(Debug)]
pub enum RecordErr {
    Io(io::Error),
    /// The file ended in the middle of a record.
    Truncated { offset: u64 },
    /// A checksum didn't match, `what` is either the length or the data.
    Corrupted { offset: u64, what: &'static str },
    /// The record isn't a valid example for the selected data format.
    Malformed(String),
}

impl fmt::Display for RecordErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordErr::Io(e) => write!(f, "io error: {e}"),
            RecordErr::Truncated { offset } => {
                write!(f, "truncated record at byte {offset}")
            }
            RecordErr::Corrupted { offset, what } => {
                write!(f, "corrupted record {what} at byte {offset}")
            }
            RecordErr::Malformed(detail) => write!(f, "malformed example: {detail}"),
        }
    }
}

impl Error for RecordErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RecordErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for RecordErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Worker runtime failures.
#[derive(Debug)]
pub enum WorkerErr {
    Io(io::Error),
    Ml(MlErr),
    Record(RecordErr),
    /// The input files couldn't be listed.
    Input(String),
    UnexpectedMessage {
        step: usize,
        got: &'static str,
    },
    WeightsLengthMismatch {
        got: usize,
        expected: usize,
    },
    GradientLengthMismatch {
        step: usize,
        got: usize,
        expected: usize,
    },
    /// A peer broke the cluster bootstrap protocol.
    Handshake(String),
    /// A peer reported an error.
    Remote(String),
    Export(String),
}

impl WorkerErr {
    /// Whether this failure is the fallout of another worker failing first: a cluster link that
    /// went down or an error a peer forwarded.
    pub fn is_peer_failure(&self) -> bool {
        match self {
            WorkerErr::Remote(_) => true,
            WorkerErr::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Io(e) => write!(f, "io error: {e}"),
            WorkerErr::Ml(e) => write!(f, "model error: {e}"),
            WorkerErr::Record(e) => write!(f, "record error: {e}"),
            WorkerErr::Input(detail) => write!(f, "invalid input files: {detail}"),
            WorkerErr::UnexpectedMessage { step, got } => {
                write!(f, "unexpected message at step {step}: got {got}")
            }
            WorkerErr::WeightsLengthMismatch { got, expected } => {
                write!(f, "weights length mismatch: got {got}, expected {expected}")
            }
            WorkerErr::GradientLengthMismatch {
                step,
                got,
                expected,
            } => write!(
                f,
                "gradient length mismatch at step {step}: got {got}, expected {expected}"
            ),
            WorkerErr::Handshake(detail) => write!(f, "cluster handshake failed: {detail}"),
            WorkerErr::Remote(detail) => write!(f, "peer failed: {detail}"),
            WorkerErr::Export(detail) => write!(f, "export failed: {detail}"),
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Io(e) => Some(e),
            WorkerErr::Ml(e) => Some(e),
            WorkerErr::Record(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WorkerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<MlErr> for WorkerErr {
    fn from(value: MlErr) -> Self {
        Self::Ml(value)
    }
}

impl From<RecordErr> for WorkerErr {
    fn from(value: RecordErr) -> Self {
        Self::Record(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<WorkerErr> for io::Error {
    fn from(value: WorkerErr) -> Self {
        match value {
            WorkerErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
