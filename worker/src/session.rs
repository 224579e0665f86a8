use std::{borrow::Cow, env, net::IpAddr};

use comms::msg::{Command, Msg};
use log::{error, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{context::WorkerContext, error::Result, train::main_fun};

/// Serves a single launcher session.
///
/// Waits for the bootstrap specification, trains and replies with the training report followed
/// by a `Disconnect`. Failures are reported to the launcher before being returned, preceded by
/// a `PeerLost` when they are the fallout of another worker failing.
///
/// # Arguments
/// * `rx` - Reading half of the launcher connection.
/// * `tx` - Writing half of the launcher connection.
/// * `ip` - The address the rest of the cluster can reach this worker at.
pub async fn serve<R, W>(rx: R, tx: W, ip: IpAddr) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let (mut rx, mut tx) = comms::channel(rx, tx);

    let spec = loop {
        match rx.recv::<Msg>().await? {
            Msg::Control(Command::CreateWorker(spec)) => break spec,
            msg => warn!("expected CreateWorker, got {}", msg.kind()),
        }
    };

    let worker_id = spec.worker_id;
    let ctx = WorkerContext::new(worker_id, spec.cluster_size, ip, env::current_dir()?);

    match main_fun(spec, ctx, &mut rx, &mut tx).await {
        Ok(report) => {
            info!("worker {worker_id} done after {} steps", report.steps);
            tx.send(&Msg::Control(Command::Report(report))).await?;
            tx.send(&Msg::Control(Command::Disconnect)).await?;
            Ok(())
        }
        Err(e) => {
            error!("worker {worker_id} failed: {e}");
            if e.is_peer_failure() {
                tx.send(&Msg::Control(Command::PeerLost)).await?;
            }

            let detail = e.to_string();
            tx.send(&Msg::Err(Cow::Borrowed(&detail))).await?;
            Err(e)
        }
    }
}
