#![allow(dead_code)]

use std::path::{Path, PathBuf};

use worker::data::{Example, Feature, IMAGE_LEN, NUM_CLASSES, RecordWriter};

/// Builds a tfos example whose pixels all hold `label * 20` and whose one-hot label is `label`.
pub fn tfos_example(label: usize) -> Example {
    let mut example = Example::new();
    let pixel = (label * 20) as i64;
    let one_hot = (0..NUM_CLASSES).map(|i| (i == label) as i64).collect();

    example.insert("image", Feature::Int64s(vec![pixel; IMAGE_LEN]));
    example.insert("label", Feature::Int64s(one_hot));
    example
}

/// Writes `files` record files named `part-{i}` into `dir`, each with `records` tfos examples.
///
/// The label of record `r` of file `f` is `(f * records + r) % 10`.
pub fn write_tfos_files(dir: &Path, files: usize, records: usize) -> Vec<PathBuf> {
    (0..files)
        .map(|f| {
            let path = dir.join(format!("part-{f:05}"));
            let mut writer = RecordWriter::create(&path).unwrap();

            for r in 0..records {
                let label = (f * records + r) % NUM_CLASSES;
                writer.write_record(&tfos_example(label).encode()).unwrap();
            }

            writer.flush().unwrap();
            path
        })
        .collect()
}
