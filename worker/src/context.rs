use std::{
    net::IpAddr,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

/// What a worker knows about its place in the cluster and its surroundings.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub worker_id: usize,
    pub cluster_size: NonZeroUsize,
    /// The address other workers can reach this one at.
    pub ip: IpAddr,
    /// The directory relative paths are resolved against.
    pub working_dir: PathBuf,
}

impl WorkerContext {
    pub fn new(
        worker_id: usize,
        cluster_size: NonZeroUsize,
        ip: IpAddr,
        working_dir: PathBuf,
    ) -> Self {
        Self {
            worker_id,
            cluster_size,
            ip,
            working_dir,
        }
    }

    pub fn is_chief(&self) -> bool {
        self.worker_id == 0
    }

    /// Resolves `path` against the working directory of the worker.
    ///
    /// Absolute paths and URIs carrying a scheme (`hdfs://…`, `file://…`) are returned untouched.
    pub fn absolute_path(&self, path: &str) -> String {
        if path.contains("://") || Path::new(path).is_absolute() {
            return path.to_string();
        }

        self.working_dir.join(path).to_string_lossy().into_owned()
    }
}
