//! DbObject binary writer

use super::types;
use super::value::DbValue;

/// Encoder for DbObject documents
#[derive(Debug, Default)]
pub struct DbWriter {
    out: Vec<u8>,
}

impl DbWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode `value` as an anonymous root entry
    pub fn write_document(value: &DbValue) -> Vec<u8> {
        let mut writer = Self::new();
        writer.write_entry(None, value);
        writer.finish()
    }

    /// Append one entry
    pub fn write_entry(&mut self, name: Option<&str>, value: &DbValue) {
        let kind = Self::kind(value);
        match name {
            Some(name) => {
                self.out.push(kind);
                self.out.extend_from_slice(name.as_bytes());
                self.out.push(0);
            }
            None => self.out.push(kind | types::ANONYMOUS),
        }
        self.write_value(value);
    }

    /// Take the encoded bytes
    pub fn finish(self) -> Vec<u8> {
        self.out
    }

    fn kind(value: &DbValue) -> u8 {
        match value {
            DbValue::Null => types::NULL,
            DbValue::Bool(_) => types::BOOL,
            DbValue::Int(_) => types::INT,
            DbValue::Long(_) => types::LONG,
            DbValue::Float(_) => types::FLOAT,
            DbValue::Double(_) => types::DOUBLE,
            DbValue::String(_) => types::STRING,
            DbValue::Guid(_) => types::GUID,
            DbValue::Sha1(_) => types::SHA1,
            DbValue::Blob(_) => types::BLOB,
            DbValue::List(_) => types::LIST,
            DbValue::Dict(_) => types::DICT,
        }
    }

    fn length(&mut self, mut value: usize) {
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                self.out.push(byte);
                break;
            }
            self.out.push(byte | 0x80);
        }
    }

    fn container<'v>(&mut self, entries: impl Iterator<Item = (Option<&'v str>, &'v DbValue)>) {
        let mut body = Self::new();
        for (name, value) in entries {
            body.write_entry(name, value);
        }
        body.out.push(types::END);
        self.length(body.out.len());
        self.out.extend_from_slice(&body.out);
    }

    fn write_value(&mut self, value: &DbValue) {
        match value {
            DbValue::Null => {}
            DbValue::Bool(v) => self.out.push(u8::from(*v)),
            DbValue::Int(v) => self.out.extend_from_slice(&v.to_le_bytes()),
            DbValue::Long(v) => self.out.extend_from_slice(&v.to_le_bytes()),
            DbValue::Float(v) => self.out.extend_from_slice(&v.to_le_bytes()),
            DbValue::Double(v) => self.out.extend_from_slice(&v.to_le_bytes()),
            DbValue::String(v) => {
                self.length(v.len() + 1);
                self.out.extend_from_slice(v.as_bytes());
                self.out.push(0);
            }
            DbValue::Guid(v) => self.out.extend_from_slice(v.as_bytes()),
            DbValue::Sha1(v) => self.out.extend_from_slice(v.as_bytes()),
            DbValue::Blob(v) => {
                self.length(v.len());
                self.out.extend_from_slice(v);
            }
            DbValue::List(items) => self.container(items.iter().map(|item| (None, item))),
            DbValue::Dict(dict) => self.container(dict.iter().map(|(k, v)| (Some(k), v))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dbobject::{DbDict, read_dict};
    use cryo_crypto::{ContentHash, Guid};

    #[test]
    fn test_layout_document_reads_back() {
        let guid = Guid::parse("4a7d3b2c-1f00-4e5d-9c8b-7a6f5e4d3c2b").unwrap();
        let chunk = DbDict::new()
            .with("id", guid)
            .with("name", "win32/default")
            .with("superbundles", vec![DbValue::from("win32/game")]);
        let root = DbDict::new()
            .with("head", 42i32)
            .with(
                "installManifest",
                DbDict::new().with("installChunks", vec![DbValue::Dict(chunk)]),
            )
            .with("sha1", ContentHash::from_data(b"x"))
            .with("payload", vec![0u8; 300]);

        let bytes = DbWriter::write_document(&DbValue::Dict(root.clone()));
        assert_eq!(read_dict(&bytes).unwrap(), root);
    }

    #[test]
    fn test_long_length_prefix() {
        let text = "x".repeat(200);
        let bytes = DbWriter::write_document(&DbValue::from(text.as_str()));
        // 201 bytes with terminator -> two-byte varint
        assert_eq!(&bytes[1..3], &[0xC9, 0x01]);
    }
}
