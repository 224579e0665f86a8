use std::{num::NonZeroUsize, path::PathBuf};

use clap::{Parser, ValueEnum};
use comms::specs::worker::{DataFormatSpec, TrainingSpec};

use crate::error::{LauncherErr, Result};

/// Amount of images in the MNIST training split.
const MNIST_TRAIN_SAMPLES: usize = 60_000;

/// Layout of the records in the input files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DataFormat {
    /// Encoded PNG image plus an integer label.
    Tfds,
    /// 784 integer pixels plus a one-hot label.
    Tfos,
}

impl From<DataFormat> for DataFormatSpec {
    fn from(format: DataFormat) -> Self {
        match format {
            DataFormat::Tfds => DataFormatSpec::Tfds,
            DataFormat::Tfos => DataFormatSpec::Tfos,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "launcher",
    version,
    about = "Trains an MNIST classifier on a cluster of mirrored workers"
)]
pub struct Args {
    /// Number of records per worker per step
    #[arg(long = "batch_size", default_value = "64")]
    pub batch_size: NonZeroUsize,

    /// Size of the shuffle buffer
    #[arg(long = "buffer_size", default_value = "10000")]
    pub buffer_size: NonZeroUsize,

    /// Number of workers in the cluster
    #[arg(long = "cluster_size", default_value = "1")]
    pub cluster_size: NonZeroUsize,

    /// Layout of the input records
    #[arg(long = "data_format", value_enum, default_value_t = DataFormat::Tfos)]
    pub data_format: DataFormat,

    /// Number of epochs of training
    #[arg(long = "epochs", default_value = "3")]
    pub epochs: NonZeroUsize,

    /// Path or glob pattern of the record files
    #[arg(long = "images_labels")]
    pub images_labels: String,

    /// Directory for checkpoints
    #[arg(long = "model_dir", default_value = "mnist_model")]
    pub model_dir: PathBuf,

    /// Directory for the exported model
    #[arg(long = "export_dir", default_value = "mnist_export")]
    pub export_dir: PathBuf,

    /// Launch tensorboard over the model directory
    #[arg(long = "tensorboard")]
    pub tensorboard: bool,

    /// Step size of the gradient descent optimizer
    #[arg(long = "learning_rate", default_value_t = 0.001)]
    pub learning_rate: f32,

    /// Steps per epoch, derived from the size of MNIST when missing
    #[arg(long = "steps_per_epoch")]
    pub steps_per_epoch: Option<NonZeroUsize>,

    /// Seed for weight initialization and shuffling
    #[arg(long = "seed")]
    pub seed: Option<u64>,

    /// Comma separated addresses of worker daemons, workers run in-process when missing
    #[arg(long = "worker_addrs", value_delimiter = ',')]
    pub worker_addrs: Vec<String>,
}

impl Args {
    /// Checks the arguments that clap can't check on its own.
    pub fn validate(&self) -> Result<()> {
        if !self.learning_rate.is_finite() || self.learning_rate <= 0. {
            return Err(LauncherErr::InvalidArgs(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }

        if !self.worker_addrs.is_empty() && self.worker_addrs.len() != self.cluster_size.get() {
            return Err(LauncherErr::InvalidArgs(format!(
                "got {} worker addresses for a cluster of {}",
                self.worker_addrs.len(),
                self.cluster_size
            )));
        }

        Ok(())
    }

    /// The amount of steps each epoch lasts.
    ///
    /// Defaults to one pass over MNIST split across the whole cluster, at least one step.
    pub fn steps_per_epoch(&self) -> NonZeroUsize {
        self.steps_per_epoch.unwrap_or_else(|| {
            let global_batch = self.batch_size.get() * self.cluster_size.get();
            NonZeroUsize::new(MNIST_TRAIN_SAMPLES / global_batch).unwrap_or(NonZeroUsize::MIN)
        })
    }

    /// Builds the training specification every worker receives.
    pub fn training_spec(&self) -> TrainingSpec {
        TrainingSpec {
            batch_size: self.batch_size,
            buffer_size: self.buffer_size,
            epochs: self.epochs,
            steps_per_epoch: self.steps_per_epoch(),
            data_format: self.data_format.into(),
            images_labels: self.images_labels.clone(),
            model_dir: self.model_dir.clone(),
            export_dir: self.export_dir.clone(),
            learning_rate: self.learning_rate,
            seed: self.seed,
        }
    }
}
