use comms::specs::worker::DataFormatSpec;
use image::ImageFormat;

use super::{Example, Feature};
use crate::error::RecordErr;

pub const IMAGE_SIDE: usize = 28;
pub const IMAGE_LEN: usize = IMAGE_SIDE * IMAGE_SIDE;
pub const NUM_CLASSES: usize = 10;

/// A single training sample, a flattened image with pixels in `[0, 1]` and its class id.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub image: Vec<f32>,
    pub label: usize,
}

fn feature<'a>(example: &'a Example, key: &str) -> Result<&'a Feature, RecordErr> {
    example
        .get(key)
        .ok_or_else(|| RecordErr::Malformed(format!("missing feature `{key}`")))
}

fn int64s<'a>(example: &'a Example, key: &str) -> Result<&'a [i64], RecordErr> {
    match feature(example, key)? {
        Feature::Int64s(values) => Ok(values),
        other => Err(RecordErr::Malformed(format!(
            "feature `{key}` is a {}, expected an int64_list",
            other.kind()
        ))),
    }
}

fn expect_len(key: &str, got: usize, expected: usize) -> Result<(), RecordErr> {
    if got != expected {
        return Err(RecordErr::Malformed(format!(
            "feature `{key}` has {got} values, expected {expected}"
        )));
    }

    Ok(())
}

fn class_id(key: &str, label: i64) -> Result<usize, RecordErr> {
    usize::try_from(label)
        .ok()
        .filter(|label| *label < NUM_CLASSES)
        .ok_or_else(|| RecordErr::Malformed(format!("feature `{key}` is out of range: {label}")))
}

/// Parses a record holding 784 integer pixels in `image` and a 10 element one-hot `label`.
pub fn parse_tfos(example: &Example) -> Result<Sample, RecordErr> {
    let pixels = int64s(example, "image")?;
    expect_len("image", pixels.len(), IMAGE_LEN)?;

    let one_hot = int64s(example, "label")?;
    expect_len("label", one_hot.len(), NUM_CLASSES)?;

    let label = one_hot
        .iter()
        .enumerate()
        .fold((0, i64::MIN), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0;

    Ok(Sample {
        image: pixels.iter().map(|&p| p as f32 / 255.).collect(),
        label,
    })
}

/// Parses a record holding a png encoded grayscale `image` and an integer `label`.
pub fn parse_tfds(example: &Example) -> Result<Sample, RecordErr> {
    let labels = int64s(example, "label")?;
    expect_len("label", labels.len(), 1)?;
    let label = class_id("label", labels[0])?;

    let encoded = match feature(example, "image")? {
        Feature::Bytes(values) => values
            .first()
            .ok_or_else(|| RecordErr::Malformed("feature `image` is empty".into()))?,
        other => {
            return Err(RecordErr::Malformed(format!(
                "feature `image` is a {}, expected a bytes_list",
                other.kind()
            )));
        }
    };

    let decoded = image::load_from_memory_with_format(encoded, ImageFormat::Png)
        .map_err(|e| RecordErr::Malformed(format!("feature `image` can't be decoded: {e}")))?
        .to_luma8();

    let (w, h) = decoded.dimensions();
    if (w as usize, h as usize) != (IMAGE_SIDE, IMAGE_SIDE) {
        return Err(RecordErr::Malformed(format!(
            "feature `image` is {w}x{h}, expected {IMAGE_SIDE}x{IMAGE_SIDE}"
        )));
    }

    Ok(Sample {
        image: decoded.into_raw().into_iter().map(|p| p as f32 / 255.).collect(),
        label,
    })
}

/// Decodes and parses a serialized example with the given format.
pub fn parse_record(format: DataFormatSpec, record: &[u8]) -> Result<Sample, RecordErr> {
    let example = Example::decode(record)?;

    match format {
        DataFormatSpec::Tfos => parse_tfos(&example),
        DataFormatSpec::Tfds => parse_tfds(&example),
    }
}
