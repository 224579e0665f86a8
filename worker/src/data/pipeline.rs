use std::path::{Path, PathBuf};

use comms::specs::worker::{DataFormatSpec, TrainingSpec};
use log::{debug, info};
use machine_learning::MlErr;
use ndarray::Array2;
use rand::{SeedableRng, rngs::StdRng};

use super::{IMAGE_LEN, Interleave, ShardSpec, Sharding, Shuffle, parse_record};
use crate::{
    context::WorkerContext,
    error::{RecordErr, Result, WorkerErr},
};

/// Files read concurrently by the interleave step.
const CYCLE_LENGTH: usize = 4;

type Records = Box<dyn Iterator<Item = std::result::Result<Vec<u8>, RecordErr>> + Send>;

/// A batch of samples, one image per row of `x` and its class id in the single column of `y`.
#[derive(Debug, Clone)]
pub struct Batch {
    pub x: Array2<f32>,
    pub y: Array2<f32>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.x.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything needed to build the input pipeline of a worker.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// An absolute path or glob pattern of the record files.
    pub pattern: String,
    pub format: DataFormatSpec,
    pub epochs: usize,
    pub buffer_size: usize,
    pub batch_size: usize,
    pub cycle_length: usize,
    pub seed: Option<u64>,
    pub shard: ShardSpec,
}

impl PipelineConfig {
    pub fn new(training: &TrainingSpec, ctx: &WorkerContext) -> Self {
        Self {
            pattern: ctx.absolute_path(&training.images_labels),
            format: training.data_format,
            epochs: training.epochs.get(),
            buffer_size: training.buffer_size.get(),
            batch_size: training.batch_size.get(),
            cycle_length: CYCLE_LENGTH,
            seed: training.seed,
            shard: ShardSpec::new(ctx.worker_id, ctx.cluster_size),
        }
    }
}

/// Lists the files matching `pattern`, sorted. A directory stands for all the files inside it.
pub(crate) fn list_files(pattern: &str) -> Result<Vec<PathBuf>> {
    let pattern = pattern.strip_prefix("file://").unwrap_or(pattern);

    if let Some((scheme, _)) = pattern.split_once("://") {
        return Err(WorkerErr::Input(format!(
            "{scheme} URIs aren't supported, only local files can be read"
        )));
    }

    let pattern = if Path::new(pattern).is_dir() {
        Path::new(pattern).join("*").to_string_lossy().into_owned()
    } else {
        pattern.to_string()
    };

    let mut files = Vec::new();
    for entry in glob::glob(&pattern).map_err(|e| WorkerErr::Input(e.to_string()))? {
        let path = entry.map_err(|e| WorkerErr::Input(e.to_string()))?;
        if path.is_file() {
            files.push(path);
        }
    }

    if files.is_empty() {
        return Err(WorkerErr::Input(format!("no files match {pattern}")));
    }

    files.sort();
    Ok(files)
}

/// The input of a worker.
///
/// The matching files are sharded between the workers, repeated once per epoch and shuffled.
/// Their records are interleaved, parsed and grouped into batches.
pub struct Pipeline {
    records: Records,
    format: DataFormatSpec,
    batch_size: usize,
}

impl Pipeline {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let files = list_files(&config.pattern)?;
        let total = files.len();
        let (files, sharding) = config.shard.split_files(files);

        info!(
            "worker {} reads {} of {total} files, sharding by {sharding:?}",
            config.shard.worker_id,
            files.len()
        );

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(config.shard.worker_id as u64)),
            None => StdRng::from_os_rng(),
        };

        let epochs = config.epochs;
        let repeated: Vec<PathBuf> = (0..epochs).flat_map(|_| files.iter().cloned()).collect();
        let shuffled = Shuffle::new(repeated.into_iter(), config.buffer_size, rng);
        let interleaved = Interleave::new(shuffled, config.cycle_length);

        let records: Records = match sharding {
            Sharding::Files => Box::new(interleaved),
            Sharding::Records => Box::new(interleaved.with_record_shard(config.shard)),
        };

        Ok(Self {
            records,
            format: config.format,
            batch_size: config.batch_size.max(1),
        })
    }

    /// Reads the next batch, the last one may hold fewer than `batch_size` samples.
    ///
    /// # Returns
    /// `None` once the input is exhausted.
    pub fn next_batch(&mut self) -> Result<Option<Batch>> {
        let mut pixels = Vec::with_capacity(self.batch_size * IMAGE_LEN);
        let mut labels = Vec::with_capacity(self.batch_size);

        for record in self.records.by_ref().take(self.batch_size) {
            let sample = parse_record(self.format, &record?)?;
            pixels.extend(sample.image);
            labels.push(sample.label as f32);
        }

        if labels.is_empty() {
            debug!("input exhausted");
            return Ok(None);
        }

        let n = labels.len();
        let x = Array2::from_shape_vec((n, IMAGE_LEN), pixels)
            .map_err(MlErr::from)?;
        let y = Array2::from_shape_vec((n, 1), labels).map_err(MlErr::from)?;

        Ok(Some(Batch { x, y }))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn files_are_listed_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["part-2", "part-0", "part-1", "other"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }

        let pattern = dir.path().join("part-*");
        let files = list_files(&pattern.to_string_lossy()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(names, ["part-0", "part-1", "part-2"]);
    }

    #[test]
    fn directory_lists_its_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), b"").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let files = list_files(&dir.path().to_string_lossy()).unwrap();
        assert_eq!(files, [dir.path().join("a")]);
    }

    #[test]
    fn no_match_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = dir.path().join("part-*");
        assert!(matches!(
            list_files(&pattern.to_string_lossy()),
            Err(WorkerErr::Input(_))
        ));
    }

    #[test]
    fn remote_uris_are_rejected() {
        assert!(matches!(
            list_files("hdfs://namenode/mnist/*"),
            Err(WorkerErr::Input(_))
        ));
    }
}
