use std::net::{Ipv4Addr, SocketAddr};

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg},
    specs::{report::TrainingReport, worker::WorkerSpec},
};
use log::{debug, info, warn};
use tokio::{
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    runtime::Runtime,
    task::JoinSet,
};

use crate::{
    args::Args,
    error::{LauncherErr, Result},
    tensorboard::Tensorboard,
};

type NetRx = OnoReceiver<OwnedReadHalf>;
type NetTx = OnoSender<OwnedWriteHalf>;

/// Where a worker failure comes from, ordered from the most to the least likely root cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Cause {
    /// The worker raised the error itself.
    Worker,
    /// The launcher lost the worker or the worker broke the protocol.
    Link,
    /// The worker failed because another worker did.
    PeerLost,
}

/// A worker that didn't report.
struct Failure {
    cause: Cause,
    err: LauncherErr,
}

impl Failure {
    fn new(cause: Cause, err: LauncherErr) -> Self {
        Self { cause, err }
    }
}

/// A running cluster of training workers.
///
/// Workers are either remote daemons or tasks of this process listening on loopback, in both
/// cases the launcher talks to them through the same TCP channels.
pub struct Cluster {
    runtime: Runtime,
    workers: Vec<(NetRx, NetTx)>,
    local: JoinSet<worker::Result<()>>,
    tensorboard: Option<Tensorboard>,
}

impl Cluster {
    /// Brings up the cluster described by `args` and starts training.
    ///
    /// # Arguments
    /// * `args` - The parsed command line arguments.
    ///
    /// # Returns
    /// The running cluster, or an error if any worker couldn't be reached or bootstrapped.
    pub fn run(args: &Args) -> Result<Self> {
        args.validate()?;

        let runtime = Runtime::new()?;
        let (workers, local) = runtime.block_on(Self::start(args))?;

        let tensorboard = if args.tensorboard {
            let _guard = runtime.enter();
            Tensorboard::spawn(&args.model_dir)
        } else {
            None
        };

        Ok(Self {
            runtime,
            workers,
            local,
            tensorboard,
        })
    }

    /// The amount of workers in the cluster.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Waits for every worker to finish training and tears the cluster down.
    ///
    /// # Returns
    /// The training reports ordered by worker id, or the first failure any worker reported.
    pub fn shutdown(self) -> Result<Vec<TrainingReport>> {
        let Self {
            runtime,
            workers,
            mut local,
            tensorboard,
        } = self;

        runtime.block_on(async move {
            let reports = Self::collect_reports(workers).await;

            if let Some(tensorboard) = tensorboard {
                tensorboard.kill().await;
            }

            match reports {
                Ok(reports) => {
                    Self::join_local(&mut local).await?;
                    info!("cluster shut down");
                    Ok(reports)
                }
                Err(e) => {
                    local.shutdown().await;
                    Err(e)
                }
            }
        })
    }

    /// Connects to every worker, bootstraps them and tells them where the chief is.
    async fn start(args: &Args) -> Result<(Vec<(NetRx, NetTx)>, JoinSet<worker::Result<()>>)> {
        let cluster_size = args.cluster_size;
        let mut local = JoinSet::new();

        let addrs = if args.worker_addrs.is_empty() {
            Self::spawn_local(cluster_size.get(), &mut local).await?
        } else {
            args.worker_addrs.clone()
        };

        info!("connecting to {} worker(s)", addrs.len());

        let training = args.training_spec();
        let mut workers = Vec::with_capacity(addrs.len());

        for (worker_id, addr) in addrs.iter().enumerate() {
            let (rx, mut tx) = Self::open_channel(addr).await?;
            let spec = WorkerSpec {
                worker_id,
                cluster_size,
                training: training.clone(),
            };

            tx.send(&Msg::Control(Command::CreateWorker(spec))).await?;
            debug!(worker_id = worker_id; "created worker at {addr}");
            workers.push((rx, tx));
        }

        let Some((chief_rx, _)) = workers.first_mut() else {
            return Err(LauncherErr::InvalidArgs("the cluster has no workers".into()));
        };

        let chief = Self::wait_for_reservation(chief_rx).await?;
        info!("chief reserved {chief} for the gradient reduction");

        for (_, tx) in workers.iter_mut() {
            tx.send(&Msg::Control(Command::JoinCluster { chief }))
                .await?;
        }

        Ok((workers, local))
    }

    /// Starts `n` in-process workers, each serving a single session on its own loopback listener.
    ///
    /// # Returns
    /// The addresses the workers are listening at.
    async fn spawn_local(n: usize, local: &mut JoinSet<worker::Result<()>>) -> Result<Vec<String>> {
        let mut addrs = Vec::with_capacity(n);

        for _ in 0..n {
            let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
            addrs.push(listener.local_addr()?.to_string());

            local.spawn(async move {
                let (stream, _) = listener.accept().await?;
                let ip = stream.local_addr()?.ip();
                let (rx, tx) = stream.into_split();
                worker::serve(rx, tx, ip).await
            });
        }

        Ok(addrs)
    }

    /// Waits for the chief to report the address it reduces gradients at.
    async fn wait_for_reservation(rx: &mut NetRx) -> Result<SocketAddr> {
        match rx.recv::<Msg>().await? {
            Msg::Control(Command::Reserved { addr }) => Ok(addr),
            Msg::Err(e) => Err(LauncherErr::WorkerFailed {
                worker_id: 0,
                msg: e.into_owned(),
            }),
            msg => Err(LauncherErr::UnexpectedMessage {
                worker_id: 0,
                expected: "Reserved",
                got: msg.kind(),
            }),
        }
    }

    /// Reads every worker's training report, each one is followed by a `Disconnect`.
    ///
    /// Workers are drained concurrently. When some of them fail, the run is blamed on the
    /// failure most likely to be the root cause, see `Cause`.
    async fn collect_reports(workers: Vec<(NetRx, NetTx)>) -> Result<Vec<TrainingReport>> {
        let size = workers.len();
        let mut drains = JoinSet::new();

        for (worker_id, (rx, tx)) in workers.into_iter().enumerate() {
            drains.spawn(async move { (worker_id, Self::drain(worker_id, rx, tx).await) });
        }

        let mut reports: Vec<Option<TrainingReport>> = vec![None; size];
        let mut failures = Vec::new();

        while let Some(joined) = drains.join_next().await {
            match joined {
                Ok((worker_id, Ok(report))) => reports[worker_id] = Some(report),
                Ok((worker_id, Err(failure))) => {
                    warn!("worker {worker_id} failed: {}", failure.err);
                    failures.push((failure.cause, worker_id, failure.err));
                }
                Err(e) => {
                    let err = LauncherErr::Join(e.to_string());
                    failures.push((Cause::Link, usize::MAX, err));
                }
            }
        }

        failures.sort_by_key(|(cause, worker_id, _)| (*cause, *worker_id));
        if let Some((_, _, err)) = failures.into_iter().next() {
            return Err(err);
        }

        reports
            .into_iter()
            .enumerate()
            .map(|(worker_id, report)| report.ok_or(LauncherErr::MissingReport { worker_id }))
            .collect()
    }

    /// Reads a single worker's messages until it disconnects.
    async fn drain(
        worker_id: usize,
        mut rx: NetRx,
        mut tx: NetTx,
    ) -> std::result::Result<TrainingReport, Failure> {
        let mut report = None;
        let mut peer_lost = false;

        loop {
            let msg = rx
                .recv::<Msg>()
                .await
                .map_err(|e| Failure::new(Cause::Link, e.into()))?;

            match msg {
                Msg::Control(Command::Report(r)) => report = Some(r),
                Msg::Control(Command::PeerLost) => peer_lost = true,
                Msg::Control(Command::Disconnect) => break,
                Msg::Err(e) => {
                    let cause = if peer_lost { Cause::PeerLost } else { Cause::Worker };
                    let err = LauncherErr::WorkerFailed {
                        worker_id,
                        msg: e.into_owned(),
                    };
                    return Err(Failure::new(cause, err));
                }
                msg => {
                    let err = LauncherErr::UnexpectedMessage {
                        worker_id,
                        expected: "Report",
                        got: msg.kind(),
                    };
                    return Err(Failure::new(Cause::Link, err));
                }
            }
        }

        let report = report
            .ok_or_else(|| Failure::new(Cause::Link, LauncherErr::MissingReport { worker_id }))?;

        if report.exhausted {
            warn!("worker {worker_id} stopped early, the input ran out");
        }

        if let Err(e) = tx.shutdown().await {
            debug!(worker_id = worker_id; "failed to close the channel: {e}");
        }

        Ok(report)
    }

    /// Joins the in-process workers.
    async fn join_local(local: &mut JoinSet<worker::Result<()>>) -> Result<()> {
        while let Some(joined) = local.join_next().await {
            joined
                .map_err(|e| LauncherErr::Join(e.to_string()))?
                .map_err(|e| LauncherErr::Join(e.to_string()))?;
        }

        Ok(())
    }

    /// Creates a communication channel with a worker through its network address.
    async fn open_channel(addr: &str) -> Result<(NetRx, NetTx)> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| LauncherErr::ConnectionFailed {
                addr: addr.to_string(),
                source,
            })?;

        let (rx, tx) = stream.into_split();
        Ok(comms::channel(rx, tx))
    }
}
