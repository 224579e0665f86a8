use std::{borrow::Cow, io, net::SocketAddr};

use crate::{
    Deserialize, Serialize,
    specs::{report::TrainingReport, worker::WorkerSpec},
};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const ERR_KIND: u8 = 0;
const CONTROL_KIND: u8 = 1;
const GRADIENT_KIND: u8 = 2;
const WEIGHTS_KIND: u8 = 3;

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug)]
pub enum Payload<'a> {
    /// A reduction buffer, the gradient followed by the step statistics.
    Gradient(&'a [f32]),
    /// A full copy of the model's weights.
    Weights(&'a mut [f32]),
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Launcher to worker: bootstrap with the given spec.
    CreateWorker(WorkerSpec),
    /// Chief to launcher: the address the chief reduces gradients at.
    Reserved { addr: SocketAddr },
    /// Launcher to worker: where to find the chief.
    JoinCluster { chief: SocketAddr },
    /// Replica to chief: first message on the reduce channel.
    Connect { worker_id: usize },
    /// Replica to chief: the replica has no more input to train on.
    EndOfData,
    /// Worker to launcher: the outcome of the training.
    Report(TrainingReport),
    /// Worker to launcher: the error that follows was caused by another worker failing first.
    PeerLost,
    Disconnect,
}

/// The application layer message for the entire system.
#[derive(Debug)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    /// A short name of the message kind, for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(_) => "control",
            Msg::Err(_) => "err",
            Msg::Data(Payload::Gradient(_)) => "data/gradient",
            Msg::Data(Payload::Weights(_)) => "data/weights",
        }
    }

    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {HEADER_SIZE} bytes"),
        ))
    }

    fn invalid_kind_byte<T>(byte: u8) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind byte {byte}"),
        ))
    }
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&(ERR_KIND as Header).to_be_bytes());
                Some(e.as_bytes())
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&(CONTROL_KIND as Header).to_be_bytes());

                // SAFETY: The `Serialize` impl for `Command` is derived and it has no
                //         non string-key maps inside, so it can't fail.
                serde_json::to_writer(buf, cmd).unwrap();
                None
            }
            Msg::Data(payload) => {
                let (kind, nums) = match payload {
                    Payload::Gradient(grad) => (GRADIENT_KIND, &grad[..]),
                    Payload::Weights(weights) => (WEIGHTS_KIND, &weights[..]),
                };

                buf.extend_from_slice(&(kind as Header).to_be_bytes());
                Some(bytemuck::cast_slice(nums))
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Self::buf_is_too_small(buf.len());
        }

        let (kind_buf, rest) = buf.split_at_mut(HEADER_SIZE);
        let mut header = [0; HEADER_SIZE];
        header.copy_from_slice(kind_buf);
        let kind = Header::from_be_bytes(header);

        let Ok(kind) = u8::try_from(kind) else {
            return Self::invalid_kind_byte(u8::MAX);
        };

        match kind {
            ERR_KIND => {
                let string = str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(string)))
            }
            CONTROL_KIND => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            GRADIENT_KIND | WEIGHTS_KIND => {
                let nums: &mut [f32] = bytemuck::try_cast_slice_mut(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;

                let payload = match kind {
                    GRADIENT_KIND => Payload::Gradient(nums),
                    _ => Payload::Weights(nums),
                };

                Ok(Self::Data(payload))
            }
            byte => Self::invalid_kind_byte(byte),
        }
    }
}
