//! DbObject binary reader

use cryo_crypto::{ContentHash, Guid};

use super::error::{DbObjectError, DbObjectResult};
use super::types;
use super::value::{DbDict, DbValue};

/// Deepest container nesting accepted
pub const MAX_DEPTH: usize = 64;

/// Cursor over an encoded DbObject document
#[derive(Debug)]
pub struct DbReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DbReader<'a> {
    /// Start reading at the beginning of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current offset
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Read one entry, returning its name (if any) and value
    pub fn read_entry(&mut self) -> DbObjectResult<(Option<String>, DbValue)> {
        let tag = self.byte()?;
        self.entry_body(tag, 0)
    }

    /// Read one entry and discard its name
    pub fn read_value(&mut self) -> DbObjectResult<DbValue> {
        Ok(self.read_entry()?.1)
    }

    fn take(&mut self, count: usize) -> DbObjectResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(count)
            .filter(|end| *end <= self.data.len())
            .ok_or(DbObjectError::Truncated(self.pos))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> DbObjectResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn byte(&mut self) -> DbObjectResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn length(&mut self) -> DbObjectResult<usize> {
        let start = self.pos;
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.byte()?;
            if shift >= 64 {
                return Err(DbObjectError::BadLength(start));
            }
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        usize::try_from(value).map_err(|_| DbObjectError::BadLength(start))
    }

    fn cstring(&mut self) -> DbObjectResult<String> {
        let rest = &self.data[self.pos..];
        let len = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or(DbObjectError::Truncated(self.data.len()))?;
        let text = String::from_utf8_lossy(&rest[..len]).into_owned();
        self.pos += len + 1;
        Ok(text)
    }

    fn entry_body(&mut self, tag: u8, depth: usize) -> DbObjectResult<(Option<String>, DbValue)> {
        let name = if tag & types::ANONYMOUS == 0 {
            Some(self.cstring()?)
        } else {
            None
        };
        let value = self.value(tag & types::TYPE_MASK, depth)?;
        Ok((name, value))
    }

    fn container<F>(&mut self, depth: usize, mut on_entry: F) -> DbObjectResult<()>
    where
        F: FnMut(Option<String>, DbValue),
    {
        if depth >= MAX_DEPTH {
            return Err(DbObjectError::TooDeep(MAX_DEPTH));
        }
        let declared = self.length()?;
        let start = self.pos;

        loop {
            let tag = self.byte()?;
            if tag & types::TYPE_MASK == types::END {
                break;
            }
            let (name, value) = self.entry_body(tag, depth + 1)?;
            on_entry(name, value);
        }

        let actual = self.pos - start;
        if actual != declared {
            return Err(DbObjectError::SizeMismatch {
                offset: start,
                declared,
                actual,
            });
        }
        Ok(())
    }

    fn value(&mut self, kind: u8, depth: usize) -> DbObjectResult<DbValue> {
        let value = match kind {
            types::LIST => {
                let mut items = Vec::new();
                self.container(depth, |_, value| items.push(value))?;
                DbValue::List(items)
            }
            types::DICT => {
                let mut dict = DbDict::new();
                self.container(depth, |name, value| {
                    dict.insert(name.unwrap_or_default(), value);
                })?;
                DbValue::Dict(dict)
            }
            types::NULL => DbValue::Null,
            types::BOOL => DbValue::Bool(self.byte()? != 0),
            types::STRING => {
                let len = self.length()?;
                let raw = self.take(len)?;
                let raw = raw.strip_suffix(&[0]).unwrap_or(raw);
                DbValue::String(String::from_utf8_lossy(raw).into_owned())
            }
            types::INT => DbValue::Int(i32::from_le_bytes(self.array()?)),
            types::LONG => DbValue::Long(i64::from_le_bytes(self.array()?)),
            types::FLOAT => DbValue::Float(f32::from_le_bytes(self.array()?)),
            types::DOUBLE => DbValue::Double(f64::from_le_bytes(self.array()?)),
            types::GUID => DbValue::Guid(Guid::from_bytes(self.array()?)),
            types::SHA1 => DbValue::Sha1(ContentHash::from_bytes(self.array()?)),
            types::BLOB => {
                let len = self.length()?;
                DbValue::Blob(self.take(len)?.to_vec())
            }
            other => return Err(DbObjectError::UnknownType(other, self.pos)),
        };
        Ok(value)
    }
}

/// Decode the document at the start of `data`
pub fn read_document(data: &[u8]) -> DbObjectResult<DbValue> {
    DbReader::new(data).read_value()
}

/// Decode a document whose root must be a dict
pub fn read_dict(data: &[u8]) -> DbObjectResult<DbDict> {
    match read_document(data)? {
        DbValue::Dict(dict) => Ok(dict),
        other => Err(DbObjectError::TypeMismatch {
            key: "<root>".to_string(),
            expected: "dict",
            found: other.type_name(),
        }),
    }
}
