pub mod args;
pub mod cluster;
pub mod error;
mod tensorboard;

pub use args::{Args, DataFormat};
pub use cluster::Cluster;
pub use error::{LauncherErr, Result};
