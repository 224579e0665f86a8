mod checkpoint;
mod saved_model;

pub use checkpoint::{checkpoint_path, load_weights, save_weights};
pub use saved_model::{MODEL_FILE, SavedModel, WEIGHTS_FILE};
