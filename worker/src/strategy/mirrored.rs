//! Synchronous data parallel training.
//!
//! Every worker keeps a full copy, a *mirror*, of the model's parameters. On each step every
//! worker computes the gradient over its own batch and the chief (worker `0`) all-reduces them:
//! replicas send theirs, the chief adds them up, averages them and sends the result back. Every
//! worker then applies the same update, so the mirrors never diverge.
//!
//! The reduction buffer is the summed gradient followed by `STATS_LEN` statistics:
//! ```text
//! [grad_0, …, grad_n, loss_sum, correct, samples]
//! ```
//! Once reduced the gradient and the loss are divided by the total amount of samples.

use std::net::SocketAddr;

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, Payload},
};
use log::{debug, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};

use crate::error::{Result, WorkerErr};

/// The amount of statistics appended after the gradient in the reduction buffer.
pub const STATS_LEN: usize = 3;

/// The statistics of a reduced step, aggregated over the whole cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepStats {
    /// The mean loss of the step.
    pub loss: f32,
    /// The amount of correct predictions.
    pub correct: f32,
    /// The amount of samples the step was computed over.
    pub samples: f32,
}

impl StepStats {
    fn from_tail(buf: &[f32]) -> Self {
        let n = buf.len();
        Self {
            loss: buf[n - 3],
            correct: buf[n - 2],
            samples: buf[n - 1],
        }
    }
}

/// The connection to another worker of the cluster.
pub struct Peer<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> {
    worker_id: usize,
    rx: OnoReceiver<R>,
    tx: OnoSender<W>,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Peer<R, W> {
    pub fn new(worker_id: usize, rx: OnoReceiver<R>, tx: OnoSender<W>) -> Self {
        Self { worker_id, rx, tx }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }
}

enum Role<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> {
    Chief { replicas: Vec<Peer<R, W>> },
    Replica { chief: Peer<R, W> },
}

/// A worker's side of the mirrored strategy.
pub struct MirroredStrategy<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> {
    worker_id: usize,
    role: Role<R, W>,
    step: usize,
    done: bool,
}

impl<R, W> MirroredStrategy<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// The chief's side, reducing the gradients of `replicas`. Without replicas every reduction
    /// only averages the chief's own gradient.
    pub fn chief(replicas: Vec<Peer<R, W>>) -> Self {
        Self {
            worker_id: 0,
            role: Role::Chief { replicas },
            step: 0,
            done: false,
        }
    }

    /// A replica's side, `chief` is the connection to the chief.
    pub fn replica(worker_id: usize, chief: Peer<R, W>) -> Self {
        Self {
            worker_id,
            role: Role::Replica { chief },
            step: 0,
            done: false,
        }
    }

    pub fn is_chief(&self) -> bool {
        matches!(self.role, Role::Chief { .. })
    }

    /// Makes every mirror start from the chief's parameters.
    ///
    /// # Arguments
    /// * `params` - The chief's parameters are sent, the replicas' are overwritten.
    pub async fn broadcast_weights(&mut self, params: &mut [f32]) -> Result<()> {
        match &mut self.role {
            Role::Chief { replicas } => {
                let msg = Msg::Data(Payload::Weights(params));
                for replica in replicas.iter_mut() {
                    replica.tx.send(&msg).await?;
                }
            }
            Role::Replica { chief } => match chief.rx.recv::<Msg>().await? {
                Msg::Data(Payload::Weights(weights)) => {
                    if weights.len() != params.len() {
                        return Err(WorkerErr::WeightsLengthMismatch {
                            got: weights.len(),
                            expected: params.len(),
                        });
                    }

                    params.copy_from_slice(weights);
                    debug!(worker_id = self.worker_id; "received the initial weights");
                }
                Msg::Err(detail) => return Err(WorkerErr::Remote(detail.into_owned())),
                other => {
                    return Err(WorkerErr::UnexpectedMessage {
                        step: self.step,
                        got: other.kind(),
                    });
                }
            },
        }

        Ok(())
    }

    /// All-reduces `buf` across the cluster.
    ///
    /// # Arguments
    /// * `buf` - The summed gradient of the local batch followed by its statistics, it's
    ///   overwritten with the cluster's reduction.
    /// * `has_data` - Whether this worker got a batch this step, `buf` is ignored otherwise.
    ///
    /// # Returns
    /// The step statistics, or `None` once any worker ran out of input. After that no more
    /// steps can be taken.
    pub async fn all_reduce(
        &mut self,
        buf: &mut [f32],
        has_data: bool,
    ) -> Result<Option<StepStats>> {
        if self.done {
            return Ok(None);
        }

        let step = self.step;
        let stats = match &mut self.role {
            Role::Chief { replicas } => Self::reduce(step, replicas, buf, has_data).await?,
            Role::Replica { chief } => Self::exchange(step, chief, buf, has_data).await?,
        };

        match stats {
            Some(_) => self.step += 1,
            None => self.done = true,
        }

        Ok(stats)
    }

    async fn reduce(
        step: usize,
        replicas: &mut [Peer<R, W>],
        buf: &mut [f32],
        has_data: bool,
    ) -> Result<Option<StepStats>> {
        let mut exhausted = !has_data;
        if exhausted {
            buf.fill(0.);
        }

        for replica in replicas.iter_mut() {
            match replica.rx.recv::<Msg>().await? {
                Msg::Data(Payload::Gradient(grad)) => {
                    if grad.len() != buf.len() {
                        return Err(WorkerErr::GradientLengthMismatch {
                            step,
                            got: grad.len(),
                            expected: buf.len(),
                        });
                    }

                    buf.iter_mut().zip(grad).for_each(|(acc, g)| *acc += g);
                }
                Msg::Control(Command::EndOfData) => {
                    info!("worker {} ran out of input at step {step}", replica.worker_id);
                    exhausted = true;
                }
                Msg::Err(detail) => return Err(WorkerErr::Remote(detail.into_owned())),
                other => {
                    return Err(WorkerErr::UnexpectedMessage {
                        step,
                        got: other.kind(),
                    });
                }
            }
        }

        let samples = buf[buf.len() - 1];
        if exhausted || samples <= 0. {
            let msg = Msg::Control(Command::Disconnect);
            for replica in replicas.iter_mut() {
                replica.tx.send(&msg).await?;
            }

            return Ok(None);
        }

        let n = buf.len();
        buf[..n - STATS_LEN].iter_mut().for_each(|g| *g /= samples);
        buf[n - 3] /= samples;

        let msg = Msg::Data(Payload::Gradient(buf));
        for replica in replicas.iter_mut() {
            replica.tx.send(&msg).await?;
        }

        debug!("reduced step {step} over {samples} samples");
        Ok(Some(StepStats::from_tail(buf)))
    }

    async fn exchange(
        step: usize,
        chief: &mut Peer<R, W>,
        buf: &mut [f32],
        has_data: bool,
    ) -> Result<Option<StepStats>> {
        if has_data {
            chief.tx.send(&Msg::Data(Payload::Gradient(buf))).await?;
        } else {
            chief.tx.send(&Msg::Control(Command::EndOfData)).await?;
        }

        match chief.rx.recv::<Msg>().await? {
            Msg::Data(Payload::Gradient(reduced)) => {
                if reduced.len() != buf.len() {
                    return Err(WorkerErr::GradientLengthMismatch {
                        step,
                        got: reduced.len(),
                        expected: buf.len(),
                    });
                }

                buf.copy_from_slice(reduced);
                Ok(Some(StepStats::from_tail(buf)))
            }
            Msg::Control(Command::Disconnect) => Ok(None),
            Msg::Err(detail) => Err(WorkerErr::Remote(detail.into_owned())),
            other => Err(WorkerErr::UnexpectedMessage {
                step,
                got: other.kind(),
            }),
        }
    }

    /// Ends the strategy, the chief releases every replica and the replicas wait to be
    /// released.
    pub async fn finish(&mut self) -> Result<()> {
        if !self.done {
            match &mut self.role {
                Role::Chief { replicas } => {
                    let msg = Msg::Control(Command::Disconnect);
                    for replica in replicas.iter_mut() {
                        replica.tx.send(&msg).await?;
                    }
                }
                Role::Replica { chief } => loop {
                    match chief.rx.recv::<Msg>().await? {
                        Msg::Control(Command::Disconnect) => break,
                        Msg::Err(detail) => return Err(WorkerErr::Remote(detail.into_owned())),
                        other => warn!("expected Disconnect from the chief, got {}", other.kind()),
                    }
                },
            }
        }

        self.done = true;

        match &mut self.role {
            Role::Chief { replicas } => {
                for replica in replicas.iter_mut() {
                    replica.tx.shutdown().await?;
                }
            }
            Role::Replica { chief } => chief.tx.shutdown().await?,
        }

        Ok(())
    }

    /// The amount of reduced steps so far.
    pub fn step(&self) -> usize {
        self.step
    }
}

/// Accepts the connections of the `cluster_size - 1` replicas.
///
/// # Returns
/// The chief's side of the strategy, with its replicas sorted by worker id.
pub async fn accept_replicas(
    listener: &TcpListener,
    cluster_size: usize,
) -> Result<MirroredStrategy<OwnedReadHalf, OwnedWriteHalf>> {
    let mut replicas: Vec<Peer<_, _>> = Vec::with_capacity(cluster_size.saturating_sub(1));

    while replicas.len() + 1 < cluster_size {
        let (stream, addr) = listener.accept().await?;
        let (rx, tx) = stream.into_split();
        let (mut rx, tx) = comms::channel(rx, tx);

        let worker_id = match rx.recv::<Msg>().await? {
            Msg::Control(Command::Connect { worker_id }) => worker_id,
            other => {
                return Err(WorkerErr::Handshake(format!(
                    "expected Connect from {addr}, got {}",
                    other.kind()
                )));
            }
        };

        if worker_id == 0 || worker_id >= cluster_size {
            return Err(WorkerErr::Handshake(format!(
                "worker id {worker_id} is out of the cluster's range"
            )));
        }

        if replicas.iter().any(|r| r.worker_id == worker_id) {
            return Err(WorkerErr::Handshake(format!(
                "worker {worker_id} connected twice"
            )));
        }

        info!("replica {worker_id} connected from {addr}");
        replicas.push(Peer::new(worker_id, rx, tx));
    }

    replicas.sort_by_key(Peer::worker_id);
    Ok(MirroredStrategy::chief(replicas))
}

/// Connects a replica to the chief listening at `chief`.
pub async fn connect_to_chief(
    chief: SocketAddr,
    worker_id: usize,
) -> Result<MirroredStrategy<OwnedReadHalf, OwnedWriteHalf>> {
    let stream = TcpStream::connect(chief).await?;
    let (rx, tx) = stream.into_split();
    let (rx, mut tx) = comms::channel(rx, tx);

    tx.send(&Msg::Control(Command::Connect { worker_id }))
        .await?;

    info!("worker {worker_id} joined the chief at {chief}");
    Ok(MirroredStrategy::replica(worker_id, Peer::new(0, rx, tx)))
}
