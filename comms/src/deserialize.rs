use std::io;

/// Builds a value borrowing from a received byte buffer.
pub trait Deserialize<'a>: Sized {
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self>;
}
