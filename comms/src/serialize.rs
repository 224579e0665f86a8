/// Writes a value into the outgoing byte buffer of an `OnoSender`.
pub trait Serialize<'a> {
    /// Serializes `self` into `buf`.
    ///
    /// # Arguments
    /// * `buf` - The buffer to append the serialized header/body to.
    ///
    /// # Returns
    /// An optional slice that is written right after `buf` without being copied.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]>;
}
