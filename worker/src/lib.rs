pub mod context;
pub mod data;
pub mod error;
pub mod export;
pub mod model;
pub mod session;
pub mod strategy;
pub mod train;

pub use context::WorkerContext;
pub use error::{RecordErr, Result, WorkerErr};
pub use session::serve;
pub use train::main_fun;
