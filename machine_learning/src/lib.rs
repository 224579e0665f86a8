pub mod arch;
pub mod error;
pub mod initialization;
pub mod optimization;
pub mod persistence;
#[cfg(test)]
mod test;

pub use error::{MlErr, Result};
