use std::{num::NonZeroUsize, path::PathBuf};

use serde::{Deserialize, Serialize};

/// Wire-level bootstrap specification for a worker instance.
///
/// The launcher sends one of these to every worker of the cluster, only `worker_id` differs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSpec {
    /// Worker identifier assigned by the launcher, `0` is the chief.
    pub worker_id: usize,
    /// Amount of workers in the cluster.
    pub cluster_size: NonZeroUsize,
    /// Training configuration.
    pub training: TrainingSpec,
}

impl WorkerSpec {
    /// Whether this worker is the chief of the cluster.
    pub fn is_chief(&self) -> bool {
        self.worker_id == 0
    }
}

/// The record layout of the input files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFormatSpec {
    /// Encoded image bytes plus an integer label.
    Tfds,
    /// 784 integer pixels plus a 10 element one-hot label.
    Tfos,
}

/// Training configuration shared by every worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSpec {
    /// Records per worker per step.
    pub batch_size: NonZeroUsize,
    /// Size of the file shuffle buffer.
    pub buffer_size: NonZeroUsize,
    pub epochs: NonZeroUsize,
    pub steps_per_epoch: NonZeroUsize,
    pub data_format: DataFormatSpec,
    /// Path or glob pattern of the record files.
    pub images_labels: String,
    pub model_dir: PathBuf,
    pub export_dir: PathBuf,
    pub learning_rate: f32,
    pub seed: Option<u64>,
}
