use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use log::debug;
use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use crate::{
    MlErr, Result,
    arch::{Model, Sequential},
    error::check_len,
};

/// The path of the checkpoint written at the end of `epoch` (1 based).
pub fn checkpoint_path(model_dir: &Path, epoch: usize) -> PathBuf {
    model_dir.join(format!("weights-{epoch:04}.safetensors"))
}

/// Yields the tensor name, shape and parameter range of every parameter block of `model`.
fn tensors(model: &Sequential) -> Vec<(String, Vec<usize>, std::ops::Range<usize>)> {
    let mut offset = 0;
    let mut tensors = Vec::new();

    for (i, layer) in model.layers().iter().enumerate() {
        for block in layer.param_blocks() {
            let range = offset..offset + block.len();
            offset = range.end;
            tensors.push((format!("layers.{i}.{}", block.name), block.shape, range));
        }
    }

    tensors
}

/// Writes the parameters of `model` to a safetensors file, one tensor per parameter block named
/// `layers.{i}.weights` and `layers.{i}.bias`. Missing parent directories are created.
///
/// # Arguments
/// * `path` - Where to write the file.
/// * `model` - The model the parameters belong to.
/// * `params` - The flat parameter buffer.
pub fn save_weights(path: &Path, model: &Sequential, params: &[f32]) -> Result<()> {
    check_len("saved parameters", params.len(), model.size())?;

    let tensors = tensors(model);
    let bytes: Vec<Vec<u8>> = tensors
        .iter()
        .map(|(_, _, range)| params[range.clone()].iter().flat_map(|f| f.to_le_bytes()).collect())
        .collect();

    let mut views = HashMap::with_capacity(tensors.len());
    for ((name, shape, _), data) in tensors.iter().zip(&bytes) {
        views.insert(name.clone(), TensorView::new(Dtype::F32, shape.clone(), data)?);
    }

    let serialized = safetensors::tensor::serialize(&views, &None)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serialized)?;

    debug!("saved {} tensors to {}", tensors.len(), path.display());
    Ok(())
}

/// Reads back the parameters of `model` written by `save_weights`.
///
/// # Returns
/// The flat parameter buffer, or an error if a tensor is missing or has the wrong shape.
pub fn load_weights(path: &Path, model: &Sequential) -> Result<Vec<f32>> {
    let data = fs::read(path)?;
    let file = SafeTensors::deserialize(&data)?;

    let mut params = vec![0.; model.size()];
    for (name, shape, range) in tensors(model) {
        let view = file.tensor(&name)?;

        if view.dtype() != Dtype::F32 || view.shape() != shape.as_slice() {
            return Err(MlErr::Persistence(format!(
                "tensor {name} is {:?} {:?}, expected F32 {shape:?}",
                view.dtype(),
                view.shape()
            )));
        }

        for (param, bytes) in params[range].iter_mut().zip(view.data().chunks_exact(4)) {
            *param = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        }
    }

    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{
        activations::ActFn,
        layers::{Dense, Layer},
    };

    fn model() -> Sequential {
        Sequential::new([
            Layer::Dense(Dense::new((3, 2), Some(ActFn::relu()))),
            Layer::Dense(Dense::new((2, 1), None)),
        ])
    }

    #[test]
    fn checkpoint_names_are_zero_padded() {
        let path = checkpoint_path(Path::new("mnist_model"), 3);
        assert_eq!(path, Path::new("mnist_model/weights-0003.safetensors"));
    }

    #[test]
    fn weights_are_restored() {
        let dir = tempfile::tempdir().unwrap();
        let path = checkpoint_path(&dir.path().join("nested"), 1);
        let model = model();
        let params: Vec<f32> = (0..model.size()).map(|i| i as f32 - 4.5).collect();

        save_weights(&path, &model, &params).unwrap();
        assert_eq!(load_weights(&path, &model).unwrap(), params);
    }

    #[test]
    fn tensors_are_named_after_their_layer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.safetensors");
        let model = model();
        save_weights(&path, &model, &vec![0.; model.size()]).unwrap();

        let data = fs::read(&path).unwrap();
        let file = SafeTensors::deserialize(&data).unwrap();
        assert_eq!(file.tensor("layers.0.weights").unwrap().shape(), &[3, 2]);
        assert_eq!(file.tensor("layers.1.bias").unwrap().shape(), &[1]);
    }

    #[test]
    fn loading_into_another_architecture_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.safetensors");
        let model = model();
        save_weights(&path, &model, &vec![0.; model.size()]).unwrap();

        let other = Sequential::new([Layer::Dense(Dense::new((4, 1), None))]);
        assert!(load_weights(&path, &other).is_err());
    }
}
