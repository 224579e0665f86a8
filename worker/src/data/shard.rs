use std::num::NonZeroUsize;

/// How the input of a worker is split from the input of the rest of the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sharding {
    /// Every worker reads its own subset of the files.
    Files,
    /// Every worker reads all the files and keeps its own subset of the records of each file.
    Records,
}

/// Shard specification for a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardSpec {
    pub worker_id: usize,
    pub num_workers: NonZeroUsize,
}

impl ShardSpec {
    pub fn new(worker_id: usize, num_workers: NonZeroUsize) -> Self {
        Self {
            worker_id,
            num_workers,
        }
    }

    /// Whether the element at `index` belongs to this worker.
    #[inline]
    pub fn owns(self, index: usize) -> bool {
        index % self.num_workers.get() == self.worker_id
    }

    /// Keeps the files that belong to this worker.
    ///
    /// Files are dealt round robin, worker `i` keeps the files at `i`, `i + n`, `i + 2n`, ….
    /// When there are fewer files than workers some would be left without input, so every
    /// worker keeps all the files and the records are sharded instead.
    pub fn split_files<T>(self, files: Vec<T>) -> (Vec<T>, Sharding) {
        if files.len() < self.num_workers.get() {
            return (files, Sharding::Records);
        }

        let files = files
            .into_iter()
            .enumerate()
            .filter_map(|(i, file)| self.owns(i).then_some(file))
            .collect();

        (files, Sharding::Files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(worker_id: usize, n: usize) -> ShardSpec {
        ShardSpec::new(worker_id, NonZeroUsize::new(n).unwrap())
    }

    #[test]
    fn files_are_dealt_round_robin() {
        let files: Vec<_> = (0..7).collect();

        assert_eq!(
            spec(0, 3).split_files(files.clone()),
            (vec![0, 3, 6], Sharding::Files)
        );
        assert_eq!(
            spec(2, 3).split_files(files),
            (vec![2, 5], Sharding::Files)
        );
    }

    #[test]
    fn too_few_files_fall_back_to_records() {
        assert_eq!(
            spec(1, 3).split_files(vec![0, 1]),
            (vec![0, 1], Sharding::Records)
        );
        assert!(spec(1, 3).owns(4));
        assert!(!spec(1, 3).owns(5));
    }

    #[test]
    fn single_worker_keeps_everything() {
        assert_eq!(
            spec(0, 1).split_files(vec![0, 1, 2]),
            (vec![0, 1, 2], Sharding::Files)
        );
    }
}
