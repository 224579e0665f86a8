mod example;
mod interleave;
mod parse;
mod pipeline;
mod shard;
mod shuffle;
mod tfrecord;

pub use example::{Example, Feature};
pub use interleave::Interleave;
pub use parse::{IMAGE_LEN, IMAGE_SIDE, NUM_CLASSES, Sample, parse_record, parse_tfds, parse_tfos};
pub use pipeline::{Batch, Pipeline, PipelineConfig};
pub use shard::{Sharding, ShardSpec};
pub use shuffle::Shuffle;
pub use tfrecord::{RecordReader, RecordWriter, masked_crc};
