mod common;

use std::{collections::HashSet, num::NonZeroUsize};

use comms::specs::worker::DataFormatSpec;
use worker::data::{Batch, Pipeline, PipelineConfig, ShardSpec};

fn config(dir: &std::path::Path, worker_id: usize, workers: usize) -> PipelineConfig {
    PipelineConfig {
        pattern: dir.join("part-*").to_string_lossy().into_owned(),
        format: DataFormatSpec::Tfos,
        epochs: 1,
        buffer_size: 100,
        batch_size: 4,
        cycle_length: 4,
        seed: Some(3),
        shard: ShardSpec::new(worker_id, NonZeroUsize::new(workers).unwrap()),
    }
}

fn drain(pipeline: &mut Pipeline) -> Vec<Batch> {
    let mut batches = Vec::new();
    while let Some(batch) = pipeline.next_batch().unwrap() {
        batches.push(batch);
    }
    batches
}

fn labels(batches: &[Batch]) -> Vec<usize> {
    batches
        .iter()
        .flat_map(|b| b.y.iter().map(|&l| l as usize).collect::<Vec<_>>())
        .collect()
}

#[test]
fn last_batch_is_partial() {
    let dir = tempfile::tempdir().unwrap();
    common::write_tfos_files(dir.path(), 2, 5);

    let mut pipeline = Pipeline::new(&config(dir.path(), 0, 1)).unwrap();
    let batches = drain(&mut pipeline);

    let sizes: Vec<_> = batches.iter().map(Batch::len).collect();
    assert_eq!(sizes, [4, 4, 2]);
    assert_eq!(batches[0].x.ncols(), 784);

    let mut seen = labels(&batches);
    seen.sort();
    assert_eq!(seen, [0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
}

#[test]
fn pixels_match_their_label() {
    let dir = tempfile::tempdir().unwrap();
    common::write_tfos_files(dir.path(), 1, 10);

    let mut pipeline = Pipeline::new(&config(dir.path(), 0, 1)).unwrap();
    for batch in drain(&mut pipeline) {
        for (row, label) in batch.x.rows().into_iter().zip(batch.y.iter()) {
            let expected = *label * 20. / 255.;
            assert!(row.iter().all(|p| (p - expected).abs() < 1e-6));
        }
    }
}

#[test]
fn epochs_repeat_the_input() {
    let dir = tempfile::tempdir().unwrap();
    common::write_tfos_files(dir.path(), 2, 3);

    let mut config = config(dir.path(), 0, 1);
    config.epochs = 3;

    let batches = drain(&mut Pipeline::new(&config).unwrap());
    let seen = labels(&batches);
    assert_eq!(seen.len(), 18);

    for label in 0..6 {
        assert_eq!(seen.iter().filter(|l| **l == label).count(), 3);
    }
}

#[test]
fn workers_read_disjoint_files() {
    let dir = tempfile::tempdir().unwrap();
    common::write_tfos_files(dir.path(), 4, 2);

    let a = labels(&drain(&mut Pipeline::new(&config(dir.path(), 0, 2)).unwrap()));
    let b = labels(&drain(&mut Pipeline::new(&config(dir.path(), 1, 2)).unwrap()));

    assert_eq!(a.len(), 4);
    assert_eq!(b.len(), 4);

    let a: HashSet<_> = a.into_iter().collect();
    let b: HashSet<_> = b.into_iter().collect();
    assert!(a.is_disjoint(&b));
    assert_eq!(a.len() + b.len(), 8);
}

#[test]
fn few_files_are_sharded_by_record() {
    let dir = tempfile::tempdir().unwrap();
    common::write_tfos_files(dir.path(), 1, 9);

    let mut all = Vec::new();
    for worker_id in 0..3 {
        let seen = labels(&drain(&mut Pipeline::new(&config(dir.path(), worker_id, 3)).unwrap()));
        assert_eq!(seen.len(), 3);
        all.extend(seen);
    }

    all.sort();
    assert_eq!(all, (0..9).collect::<Vec<_>>());
}

#[test]
fn record_shards_partition_every_epoch_across_files() {
    let dir = tempfile::tempdir().unwrap();
    common::write_tfos_files(dir.path(), 2, 5);

    for seed in [Some(3), None] {
        let mut counts = [0; 10];
        for worker_id in 0..3 {
            let mut config = config(dir.path(), worker_id, 3);
            config.epochs = 2;
            config.seed = seed;

            for label in labels(&drain(&mut Pipeline::new(&config).unwrap())) {
                counts[label] += 1;
            }
        }

        assert_eq!(counts, [2; 10], "seed {seed:?}");
    }
}

#[test]
fn corrupted_file_fails_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let files = common::write_tfos_files(dir.path(), 1, 2);

    let mut bytes = std::fs::read(&files[0]).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    std::fs::write(&files[0], bytes).unwrap();

    let mut pipeline = Pipeline::new(&config(dir.path(), 0, 1)).unwrap();
    assert!(pipeline.next_batch().is_err());
}
