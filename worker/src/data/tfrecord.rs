//! Reading and writing of TFRecord files.
//!
//! Every record is framed as
//! ```text
//! u64 LE length | u32 LE masked crc32c(length) | data | u32 LE masked crc32c(data)
//! ```

use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::Path,
};

use crate::error::RecordErr;

const MASK_DELTA: u32 = 0xa282_ead8;
const LEN_SIZE: usize = size_of::<u64>();
const CRC_SIZE: usize = size_of::<u32>();

/// The masked crc32c checksum stored alongside the length and the data of every record.
pub fn masked_crc(data: &[u8]) -> u32 {
    let crc = crc32c::crc32c(data);
    crc.rotate_right(15).wrapping_add(MASK_DELTA)
}

/// Reads from `rx` until `buf` is full or the reader is exhausted.
///
/// # Returns
/// The amount of bytes read.
fn read_full<R: Read>(rx: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut read = 0;

    while read < buf.len() {
        match rx.read(&mut buf[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }

    Ok(read)
}

/// A sequential reader of TFRecord framed records.
pub struct RecordReader<R: Read> {
    rx: R,
    offset: u64,
}

impl RecordReader<BufReader<File>> {
    /// Opens the record file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RecordErr> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: Read> RecordReader<R> {
    pub fn new(rx: R) -> Self {
        Self { rx, offset: 0 }
    }

    /// Reads the next record.
    ///
    /// # Returns
    /// `None` on a clean end of file, an error if the file ends mid record or a checksum
    /// doesn't match.
    pub fn next_record(&mut self) -> Result<Option<Vec<u8>>, RecordErr> {
        let start = self.offset;

        let mut header = [0; LEN_SIZE + CRC_SIZE];
        match read_full(&mut self.rx, &mut header)? {
            0 => return Ok(None),
            n if n < header.len() => return Err(RecordErr::Truncated { offset: start }),
            _ => {}
        }

        let (len_bytes, crc_bytes) = header.split_at(LEN_SIZE);
        let mut crc = [0; CRC_SIZE];
        crc.copy_from_slice(crc_bytes);

        if masked_crc(len_bytes) != u32::from_le_bytes(crc) {
            return Err(RecordErr::Corrupted {
                offset: start,
                what: "length",
            });
        }

        let mut len = [0; LEN_SIZE];
        len.copy_from_slice(len_bytes);
        let len = u64::from_le_bytes(len);

        let mut data = Vec::new();
        let read = (&mut self.rx).take(len).read_to_end(&mut data)?;
        if (read as u64) < len {
            return Err(RecordErr::Truncated { offset: start });
        }

        if read_full(&mut self.rx, &mut crc)? < CRC_SIZE {
            return Err(RecordErr::Truncated { offset: start });
        }

        if masked_crc(&data) != u32::from_le_bytes(crc) {
            return Err(RecordErr::Corrupted {
                offset: start,
                what: "data",
            });
        }

        self.offset += (header.len() + data.len() + CRC_SIZE) as u64;
        Ok(Some(data))
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<Vec<u8>, RecordErr>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Writes TFRecord framed records.
pub struct RecordWriter<W: Write> {
    tx: W,
}

impl RecordWriter<BufWriter<File>> {
    /// Creates, or truncates, the record file at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> RecordWriter<W> {
    pub fn new(tx: W) -> Self {
        Self { tx }
    }

    pub fn write_record(&mut self, data: &[u8]) -> io::Result<()> {
        let len = (data.len() as u64).to_le_bytes();

        self.tx.write_all(&len)?;
        self.tx.write_all(&masked_crc(&len).to_le_bytes())?;
        self.tx.write_all(data)?;
        self.tx.write_all(&masked_crc(data).to_le_bytes())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.tx.flush()
    }

    pub fn into_inner(self) -> W {
        self.tx
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn framed(records: &[&[u8]]) -> Vec<u8> {
        let mut writer = RecordWriter::new(Vec::new());
        for record in records {
            writer.write_record(record).unwrap();
        }
        writer.into_inner()
    }

    #[test]
    fn known_checksum() {
        // crc32c("123456789") = 0xe3069283
        let expected = 0xe306_9283u32.rotate_right(15).wrapping_add(MASK_DELTA);
        assert_eq!(masked_crc(b"123456789"), expected);
    }

    #[test]
    fn records_are_read_in_order() {
        let bytes = framed(&[b"first", b"", b"third"]);
        let records: Vec<_> = RecordReader::new(Cursor::new(bytes))
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(records, vec![b"first".to_vec(), vec![], b"third".to_vec()]);
    }

    #[test]
    fn truncated_record_is_an_error() {
        let mut bytes = framed(&[b"first", b"second"]);
        bytes.truncate(bytes.len() - 3);

        let mut reader = RecordReader::new(Cursor::new(bytes));
        assert!(reader.next_record().unwrap().is_some());
        assert!(matches!(
            reader.next_record(),
            Err(RecordErr::Truncated { offset: 21 })
        ));
    }

    #[test]
    fn flipped_byte_is_detected() {
        let mut bytes = framed(&[b"payload"]);
        bytes[14] ^= 0xff;

        let mut reader = RecordReader::new(Cursor::new(bytes));
        assert!(matches!(
            reader.next_record(),
            Err(RecordErr::Corrupted { what: "data", .. })
        ));
    }

    #[test]
    fn corrupted_length_is_detected() {
        let mut bytes = framed(&[b"payload"]);
        bytes[0] ^= 0x01;

        let mut reader = RecordReader::new(Cursor::new(bytes));
        assert!(matches!(
            reader.next_record(),
            Err(RecordErr::Corrupted { what: "length", .. })
        ));
    }
}
