use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Metrics of a single training epoch, averaged over the whole cluster.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    pub epoch: usize,
    pub loss: f32,
    pub accuracy: f32,
}

/// What a worker sends back to the launcher once it is done training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub worker_id: usize,
    pub steps: usize,
    pub epochs: Vec<EpochStats>,
    /// Set when any worker ran out of input before the configured amount of steps.
    pub exhausted: bool,
    /// Where the trained model was exported, only the chief exports.
    pub export_dir: Option<PathBuf>,
}
