use std::{fs::File, io::BufReader, path::PathBuf};

use log::debug;

use super::{RecordReader, ShardSpec};
use crate::error::RecordErr;

/// An open record file and the index of the next record in it.
struct OpenFile {
    reader: RecordReader<BufReader<File>>,
    index: usize,
}

impl OpenFile {
    /// Reads the next record owned by `shard`, every record when there is no shard.
    fn next_owned(&mut self, shard: Option<ShardSpec>) -> Result<Option<Vec<u8>>, RecordErr> {
        while let Some(record) = self.reader.next_record()? {
            let index = self.index;
            self.index += 1;

            if shard.is_none_or(|shard| shard.owns(index)) {
                return Ok(Some(record));
            }
        }

        Ok(None)
    }
}

/// Reads the records of several files at once, taking one record from each open file in turn.
///
/// Up to `cycle_length` files are open at the same time, whenever one of them is exhausted its
/// slot is taken by the next file. With a record shard only the records whose index inside
/// their file belongs to the shard are yielded, so the order the files come in doesn't change
/// which worker reads which record.
pub struct Interleave<I: Iterator<Item = PathBuf>> {
    paths: I,
    open: Vec<OpenFile>,
    cycle_length: usize,
    cursor: usize,
    shard: Option<ShardSpec>,
}

impl<I: Iterator<Item = PathBuf>> Interleave<I> {
    pub fn new(paths: I, cycle_length: usize) -> Self {
        Self {
            paths,
            open: Vec::new(),
            cycle_length: cycle_length.max(1),
            cursor: 0,
            shard: None,
        }
    }

    /// Keeps only the records of every file that `shard` owns.
    pub fn with_record_shard(mut self, shard: ShardSpec) -> Self {
        self.shard = Some(shard);
        self
    }

    fn open_next(&mut self) -> Option<Result<OpenFile, RecordErr>> {
        let path = self.paths.next()?;
        debug!("opening record file {}", path.display());
        Some(RecordReader::open(path).map(|reader| OpenFile { reader, index: 0 }))
    }
}

impl<I: Iterator<Item = PathBuf>> Iterator for Interleave<I> {
    type Item = Result<Vec<u8>, RecordErr>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.open.is_empty() {
                while self.open.len() < self.cycle_length {
                    match self.open_next() {
                        Some(Ok(file)) => self.open.push(file),
                        Some(Err(e)) => return Some(Err(e)),
                        None => break,
                    }
                }

                if self.open.is_empty() {
                    return None;
                }
                self.cursor = 0;
            }

            let i = self.cursor;
            match self.open[i].next_owned(self.shard) {
                Ok(Some(record)) => {
                    self.cursor = (i + 1) % self.open.len();
                    return Some(Ok(record));
                }
                Ok(None) => match self.open_next() {
                    Some(Ok(file)) => self.open[i] = file,
                    Some(Err(e)) => return Some(Err(e)),
                    None => {
                        self.open.remove(i);
                        if !self.open.is_empty() {
                            self.cursor = i % self.open.len();
                        }
                    }
                },
                Err(e) => {
                    self.open.remove(i);
                    if !self.open.is_empty() {
                        self.cursor = i % self.open.len();
                    }
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::data::RecordWriter;

    fn write_file(dir: &Path, name: &str, records: &[&str]) -> PathBuf {
        let path = dir.join(name);
        let mut writer = RecordWriter::create(&path).unwrap();
        for record in records {
            writer.write_record(record.as_bytes()).unwrap();
        }
        writer.flush().unwrap();
        path
    }

    fn read_all<I: Iterator<Item = PathBuf>>(interleave: Interleave<I>) -> Vec<String> {
        interleave
            .map(|r| String::from_utf8(r.unwrap()).unwrap())
            .collect()
    }

    #[test]
    fn takes_one_record_from_each_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(dir.path(), "a", &["a0", "a1", "a2"]);
        let b = write_file(dir.path(), "b", &["b0"]);
        let c = write_file(dir.path(), "c", &["c0", "c1"]);

        let records = read_all(Interleave::new(vec![a, b, c].into_iter(), 2));
        assert_eq!(records, ["a0", "b0", "a1", "c0", "a2", "c1"]);
    }

    #[test]
    fn cycle_of_one_reads_sequentially() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(dir.path(), "a", &["a0", "a1"]);
        let b = write_file(dir.path(), "b", &["b0"]);

        let records = read_all(Interleave::new(vec![a, b].into_iter(), 1));
        assert_eq!(records, ["a0", "a1", "b0"]);
    }

    #[test]
    fn record_shard_keeps_the_owned_index_of_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(dir.path(), "a", &["a0", "a1", "a2", "a3"]);
        let b = write_file(dir.path(), "b", &["b0", "b1"]);
        let shard = ShardSpec::new(1, std::num::NonZeroUsize::new(2).unwrap());

        let records = read_all(Interleave::new(vec![b, a].into_iter(), 2).with_record_shard(shard));
        assert_eq!(records, ["b1", "a1", "a3"]);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut interleave = Interleave::new(vec![dir.path().join("nope")].into_iter(), 4);

        assert!(matches!(interleave.next(), Some(Err(RecordErr::Io(_)))));
    }
}
