use std::{net::SocketAddr, path::PathBuf};

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg},
    specs::{
        machine_learning::LossFnSpec,
        report::{EpochStats, TrainingReport},
        worker::WorkerSpec,
    },
};
use log::{debug, info, warn};
use machine_learning::{
    arch::{
        Model, ModelBuilder, Sequential,
        loss::{LossFn, Mse, SparseCategoricalCrossEntropy, correct_predictions},
    },
    optimization::{self, Optimizer},
    persistence::{SavedModel, checkpoint_path, save_weights},
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
};

use crate::{
    context::WorkerContext,
    data::{Pipeline, PipelineConfig},
    error::{Result, WorkerErr},
    export::export_saved_model,
    model::{CompiledModel, build_and_compile_cnn_model},
    strategy::{MirroredStrategy, STATS_LEN, accept_replicas, connect_to_chief},
};

/// What `fit` leaves behind.
#[derive(Debug, Default)]
pub struct FitSummary {
    pub steps: usize,
    pub epochs: Vec<EpochStats>,
    /// Whether some worker ran out of input before the last step.
    pub exhausted: bool,
}

/// Running totals of an epoch.
#[derive(Debug, Default)]
struct EpochTotals {
    steps: usize,
    loss: f32,
    correct: f32,
    samples: f32,
}

impl EpochTotals {
    fn stats(&self, epoch: usize) -> EpochStats {
        let samples = self.samples.max(1.);
        EpochStats {
            epoch,
            loss: self.loss / samples,
            accuracy: self.correct / samples,
        }
    }
}

/// Trains a mirror of the model, in lockstep with the rest of the cluster.
pub struct Trainer<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> {
    model: Sequential,
    params: Vec<f32>,
    optimizer: Box<dyn Optimizer + Send>,
    strategy: MirroredStrategy<R, W>,
    epochs: usize,
    steps_per_epoch: usize,
    model_dir: PathBuf,
}

impl<R, W> Trainer<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Creates a new `Trainer`.
    ///
    /// # Arguments
    /// * `model` - The model to train.
    /// * `params` - The initial parameters, already the same on every worker.
    /// * `optimizer` - The update rule.
    /// * `strategy` - This worker's side of the mirrored strategy.
    /// * `epochs` - The amount of epochs to train for.
    /// * `steps_per_epoch` - The amount of steps every epoch has.
    /// * `model_dir` - Where the chief writes its checkpoints.
    pub fn new(
        model: Sequential,
        params: Vec<f32>,
        optimizer: Box<dyn Optimizer + Send>,
        strategy: MirroredStrategy<R, W>,
        epochs: usize,
        steps_per_epoch: usize,
        model_dir: PathBuf,
    ) -> Self {
        Self {
            model,
            params,
            optimizer,
            strategy,
            epochs,
            steps_per_epoch,
            model_dir,
        }
    }

    /// Runs `epochs` epochs of `steps_per_epoch` steps each.
    ///
    /// Training stops early, with a warning, as soon as any worker of the cluster runs out of
    /// input. After every complete epoch the chief writes a checkpoint.
    pub async fn fit<L>(&mut self, pipeline: &mut Pipeline, loss_fn: &L) -> Result<FitSummary>
    where
        L: LossFn + Sync,
    {
        let size = self.model.size();
        let mut grad = vec![0.; size];
        let mut buf = vec![0.; size + STATS_LEN];
        let mut summary = FitSummary::default();

        'epochs: for epoch in 1..=self.epochs {
            let mut totals = EpochTotals::default();

            for step in 0..self.steps_per_epoch {
                let batch = pipeline.next_batch()?;

                if let Some(batch) = &batch {
                    let out = self.model.backprop(
                        &self.params,
                        &mut grad,
                        loss_fn,
                        batch.x.view(),
                        batch.y.view(),
                    )?;

                    let n = batch.len() as f32;
                    buf[..size]
                        .iter_mut()
                        .zip(&grad)
                        .for_each(|(b, g)| *b = g * n);

                    buf[size] = out.loss * n;
                    buf[size + 1] = correct_predictions(out.y_pred.view(), batch.y.view()) as f32;
                    buf[size + 2] = n;
                }

                let Some(stats) = self.strategy.all_reduce(&mut buf, batch.is_some()).await? else {
                    warn!(
                        "ran out of input at epoch {epoch} step {step}, stopping after {} steps",
                        summary.steps
                    );

                    summary.exhausted = true;
                    if totals.steps > 0 {
                        summary.epochs.push(totals.stats(epoch));
                    }
                    break 'epochs;
                };

                self.optimizer.update_params(&buf[..size], &mut self.params)?;

                totals.steps += 1;
                totals.loss += stats.loss * stats.samples;
                totals.correct += stats.correct;
                totals.samples += stats.samples;
                summary.steps += 1;

                debug!("epoch {epoch} step {step}: loss={:.4}", stats.loss);
            }

            let stats = totals.stats(epoch);
            info!(
                "epoch {epoch}/{}: loss={:.4} accuracy={:.4}",
                self.epochs, stats.loss, stats.accuracy
            );
            summary.epochs.push(stats);

            if self.strategy.is_chief() {
                let path = checkpoint_path(&self.model_dir, epoch);
                save_weights(&path, &self.model, &self.params)?;
                info!("saved checkpoint {}", path.display());
            }
        }

        Ok(summary)
    }

    /// Releases the rest of the cluster and hands back the trained model.
    pub async fn finish(mut self) -> Result<(Sequential, Vec<f32>)> {
        self.strategy.finish().await?;
        Ok((self.model, self.params))
    }
}

/// Waits for the launcher to tell where the chief is.
async fn wait_for_chief<R>(launcher_rx: &mut OnoReceiver<R>) -> Result<SocketAddr>
where
    R: AsyncRead + Unpin,
{
    loop {
        match launcher_rx.recv::<Msg>().await? {
            Msg::Control(Command::JoinCluster { chief }) => return Ok(chief),
            Msg::Control(Command::Disconnect) => {
                return Err(WorkerErr::Handshake(
                    "the launcher disconnected before the cluster was formed".into(),
                ));
            }
            Msg::Err(detail) => return Err(WorkerErr::Remote(detail.into_owned())),
            other => warn!("expected JoinCluster, got {}", other.kind()),
        }
    }
}

/// Trains and exports the mnist classifier as one worker of the cluster.
///
/// The chief reserves the address the gradients are reduced at and reports it to the launcher,
/// then every worker waits for the launcher to share it and joins the strategy. The chief
/// initializes the weights and mirrors them to the replicas before training starts, and exports
/// the trained model once training is done.
///
/// # Arguments
/// * `spec` - The bootstrap specification sent by the launcher.
/// * `ctx` - Where this worker stands in the cluster.
/// * `launcher_rx` - Receiving end of the launcher channel.
/// * `launcher_tx` - Sending end of the launcher channel.
///
/// # Returns
/// The report of the training.
pub async fn main_fun<R, W>(
    spec: WorkerSpec,
    ctx: WorkerContext,
    launcher_rx: &mut OnoReceiver<R>,
    launcher_tx: &mut OnoSender<W>,
) -> Result<TrainingReport>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let training = &spec.training;
    let worker_id = ctx.worker_id;
    info!(
        "worker {worker_id} of {} starting, training spec: {training:?}",
        ctx.cluster_size
    );

    let CompiledModel {
        model,
        optimizer,
        loss,
    } = build_and_compile_cnn_model(training.learning_rate)?;

    let listener = if ctx.is_chief() {
        let listener = TcpListener::bind((ctx.ip, 0)).await?;
        let addr = listener.local_addr()?;
        launcher_tx
            .send(&Msg::Control(Command::Reserved { addr }))
            .await?;

        info!("chief reducing gradients at {addr}");
        Some(listener)
    } else {
        None
    };

    let chief = wait_for_chief(launcher_rx).await?;
    let mut strategy = match &listener {
        Some(listener) => accept_replicas(listener, ctx.cluster_size.get()).await?,
        None => connect_to_chief(chief, worker_id).await?,
    };
    drop(listener);

    let mut params = if ctx.is_chief() {
        ModelBuilder::new().init_params(&model, training.seed)?
    } else {
        vec![0.; model.size()]
    };
    strategy.broadcast_weights(&mut params).await?;

    let mut pipeline = Pipeline::new(&PipelineConfig::new(training, &ctx))?;
    let optimizer = optimization::from_spec(&optimizer, params.len());

    let mut trainer = Trainer::new(
        model,
        params,
        optimizer,
        strategy,
        training.epochs.get(),
        training.steps_per_epoch.get(),
        training.model_dir.clone(),
    );

    let summary = match loss {
        LossFnSpec::SparseCategoricalCrossEntropy => {
            trainer
                .fit(&mut pipeline, &SparseCategoricalCrossEntropy::new())
                .await?
        }
        LossFnSpec::Mse => trainer.fit(&mut pipeline, &Mse::new()).await?,
    };

    let (model, params) = trainer.finish().await?;

    let export_dir = if ctx.is_chief() {
        let saved = SavedModel::new(model, params, loss);
        Some(export_saved_model(&training.export_dir, &saved)?)
    } else {
        None
    };

    Ok(TrainingReport {
        worker_id,
        steps: summary.steps,
        epochs: summary.epochs,
        exhausted: summary.exhausted,
        export_dir,
    })
}
