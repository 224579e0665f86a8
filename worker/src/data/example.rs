//! A minimal protobuf codec for `tf.Example` records.
//!
//! ```text
//! Example  { Features features = 1; }
//! Features { map<string, Feature> feature = 1; }
//! Feature  { oneof { BytesList = 1; FloatList = 2; Int64List = 3; } }
//! ```

use std::collections::BTreeMap;

use crate::error::RecordErr;

const VARINT: u8 = 0;
const FIXED64: u8 = 1;
const LEN: u8 = 2;
const FIXED32: u8 = 5;

/// A single named feature of an example.
#[derive(Debug, Clone, PartialEq)]
pub enum Feature {
    Bytes(Vec<Vec<u8>>),
    Floats(Vec<f32>),
    Int64s(Vec<i64>),
}

impl Feature {
    pub fn kind(&self) -> &'static str {
        match self {
            Feature::Bytes(_) => "bytes_list",
            Feature::Floats(_) => "float_list",
            Feature::Int64s(_) => "int64_list",
        }
    }
}

/// A decoded `tf.Example`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Example {
    features: BTreeMap<String, Feature>,
}

fn malformed<T>(detail: &str) -> Result<T, RecordErr> {
    Err(RecordErr::Malformed(detail.to_string()))
}

/// Cursor over a protobuf encoded message.
struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn varint(&mut self) -> Result<u64, RecordErr> {
        let mut value = 0u64;

        for (i, byte) in self.buf.iter().enumerate().take(10) {
            value |= u64::from(byte & 0x7f) << (7 * i);

            if byte & 0x80 == 0 {
                self.buf = &self.buf[i + 1..];
                return Ok(value);
            }
        }

        malformed("unterminated varint")
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], RecordErr> {
        if self.buf.len() < n {
            return malformed("field runs past the end of the message");
        }

        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn bytes(&mut self) -> Result<&'a [u8], RecordErr> {
        let len = self.varint()? as usize;
        self.take(len)
    }

    fn fixed32(&mut self) -> Result<[u8; 4], RecordErr> {
        let mut out = [0; 4];
        out.copy_from_slice(self.take(4)?);
        Ok(out)
    }

    /// Reads the next field tag.
    ///
    /// # Returns
    /// The field number and its wire type.
    fn tag(&mut self) -> Result<(u64, u8), RecordErr> {
        let key = self.varint()?;
        Ok((key >> 3, (key & 0x7) as u8))
    }

    fn skip(&mut self, wire_type: u8) -> Result<(), RecordErr> {
        match wire_type {
            VARINT => self.varint().map(drop),
            FIXED64 => self.take(8).map(drop),
            LEN => self.bytes().map(drop),
            FIXED32 => self.take(4).map(drop),
            other => malformed(&format!("unsupported wire type {other}")),
        }
    }
}

fn decode_feature(buf: &[u8]) -> Result<Feature, RecordErr> {
    let mut rd = WireReader::new(buf);
    let mut feature = None;

    while !rd.is_empty() {
        let (field, wire_type) = rd.tag()?;

        feature = match (field, wire_type) {
            (1, LEN) => Some(decode_bytes_list(rd.bytes()?)?),
            (2, LEN) => Some(decode_float_list(rd.bytes()?)?),
            (3, LEN) => Some(decode_int64_list(rd.bytes()?)?),
            _ => {
                rd.skip(wire_type)?;
                continue;
            }
        };
    }

    // An empty `Feature` carries no list at all, treat it as an empty byte list.
    Ok(feature.unwrap_or(Feature::Bytes(Vec::new())))
}

fn decode_bytes_list(buf: &[u8]) -> Result<Feature, RecordErr> {
    let mut rd = WireReader::new(buf);
    let mut values = Vec::new();

    while !rd.is_empty() {
        match rd.tag()? {
            (1, LEN) => values.push(rd.bytes()?.to_vec()),
            (_, wire_type) => rd.skip(wire_type)?,
        }
    }

    Ok(Feature::Bytes(values))
}

fn decode_float_list(buf: &[u8]) -> Result<Feature, RecordErr> {
    let mut rd = WireReader::new(buf);
    let mut values = Vec::new();

    while !rd.is_empty() {
        match rd.tag()? {
            (1, LEN) => {
                let packed = rd.bytes()?;
                if packed.len() % 4 != 0 {
                    return malformed("packed float list isn't a multiple of 4 bytes");
                }

                values.extend(
                    packed
                        .chunks_exact(4)
                        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
                );
            }
            (1, FIXED32) => values.push(f32::from_le_bytes(rd.fixed32()?)),
            (_, wire_type) => rd.skip(wire_type)?,
        }
    }

    Ok(Feature::Floats(values))
}

fn decode_int64_list(buf: &[u8]) -> Result<Feature, RecordErr> {
    let mut rd = WireReader::new(buf);
    let mut values = Vec::new();

    while !rd.is_empty() {
        match rd.tag()? {
            (1, LEN) => {
                let mut packed = WireReader::new(rd.bytes()?);
                while !packed.is_empty() {
                    values.push(packed.varint()? as i64);
                }
            }
            (1, VARINT) => values.push(rd.varint()? as i64),
            (_, wire_type) => rd.skip(wire_type)?,
        }
    }

    Ok(Feature::Int64s(values))
}

fn put_varint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

fn put_tag(buf: &mut Vec<u8>, field: u64, wire_type: u8) {
    put_varint(buf, (field << 3) | u64::from(wire_type));
}

fn put_bytes(buf: &mut Vec<u8>, field: u64, data: &[u8]) {
    put_tag(buf, field, LEN);
    put_varint(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

fn encode_feature(feature: &Feature) -> Vec<u8> {
    let mut list = Vec::new();

    let field = match feature {
        Feature::Bytes(values) => {
            for value in values {
                put_bytes(&mut list, 1, value);
            }
            1
        }
        Feature::Floats(values) => {
            let packed: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
            put_bytes(&mut list, 1, &packed);
            2
        }
        Feature::Int64s(values) => {
            let mut packed = Vec::new();
            for value in values {
                put_varint(&mut packed, *value as u64);
            }
            put_bytes(&mut list, 1, &packed);
            3
        }
    };

    let mut buf = Vec::new();
    put_bytes(&mut buf, field, &list);
    buf
}

impl Example {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a serialized `tf.Example`, unknown fields are skipped.
    pub fn decode(buf: &[u8]) -> Result<Self, RecordErr> {
        let mut example = Self::new();
        let mut rd = WireReader::new(buf);

        while !rd.is_empty() {
            match rd.tag()? {
                (1, LEN) => example.decode_features(rd.bytes()?)?,
                (_, wire_type) => rd.skip(wire_type)?,
            }
        }

        Ok(example)
    }

    fn decode_features(&mut self, buf: &[u8]) -> Result<(), RecordErr> {
        let mut rd = WireReader::new(buf);

        while !rd.is_empty() {
            match rd.tag()? {
                (1, LEN) => {
                    let mut entry = WireReader::new(rd.bytes()?);
                    let mut key = String::new();
                    let mut value = None;

                    while !entry.is_empty() {
                        match entry.tag()? {
                            (1, LEN) => {
                                key = String::from_utf8(entry.bytes()?.to_vec()).or_else(|_| {
                                    malformed("feature name isn't valid utf-8")
                                })?;
                            }
                            (2, LEN) => value = Some(decode_feature(entry.bytes()?)?),
                            (_, wire_type) => entry.skip(wire_type)?,
                        }
                    }

                    self.features
                        .insert(key, value.unwrap_or(Feature::Bytes(Vec::new())));
                }
                (_, wire_type) => rd.skip(wire_type)?,
            }
        }

        Ok(())
    }

    /// Serializes the example, numeric lists are packed.
    pub fn encode(&self) -> Vec<u8> {
        let mut features = Vec::new();

        for (key, feature) in &self.features {
            let mut entry = Vec::new();
            put_bytes(&mut entry, 1, key.as_bytes());
            put_bytes(&mut entry, 2, &encode_feature(feature));
            put_bytes(&mut features, 1, &entry);
        }

        let mut buf = Vec::new();
        put_bytes(&mut buf, 1, &features);
        buf
    }

    pub fn insert<K: Into<String>>(&mut self, key: K, feature: Feature) {
        self.features.insert(key.into(), feature);
    }

    pub fn get(&self, key: &str) -> Option<&Feature> {
        self.features.get(key)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_example_decodes_back() {
        let mut example = Example::new();
        example.insert("image", Feature::Int64s(vec![0, 255, 300, -1]));
        example.insert("label", Feature::Floats(vec![0.5, 1.0]));
        example.insert("raw", Feature::Bytes(vec![b"png".to_vec(), vec![]]));

        assert_eq!(Example::decode(&example.encode()).unwrap(), example);
    }

    #[test]
    fn unpacked_lists_are_accepted() {
        // Feature { int64_list { value: 7 value: 300 } }
        let int64_list = [0x08, 0x07, 0x08, 0xac, 0x02];
        let mut feature = vec![0x1a, int64_list.len() as u8];
        feature.extend_from_slice(&int64_list);

        assert_eq!(decode_feature(&feature).unwrap(), Feature::Int64s(vec![7, 300]));

        // Feature { float_list { value: 1.5 } }
        let mut float_list = vec![0x0d];
        float_list.extend_from_slice(&1.5f32.to_le_bytes());
        let mut feature = vec![0x12, float_list.len() as u8];
        feature.extend_from_slice(&float_list);

        assert_eq!(decode_feature(&feature).unwrap(), Feature::Floats(vec![1.5]));
    }

    #[test]
    fn unknown_fields_are_skipped() {
        let mut example = Example::new();
        example.insert("label", Feature::Int64s(vec![3]));

        let mut buf = vec![0x10, 0x2a]; // field 2, varint 42
        buf.extend(example.encode());
        buf.extend([0x1d, 0, 0, 0, 0]); // field 3, fixed32

        assert_eq!(Example::decode(&buf).unwrap(), example);
    }

    #[test]
    fn truncated_message_is_malformed() {
        let mut example = Example::new();
        example.insert("label", Feature::Int64s(vec![3]));
        let buf = example.encode();

        assert!(matches!(
            Example::decode(&buf[..buf.len() - 1]),
            Err(RecordErr::Malformed(_))
        ));
    }
}
