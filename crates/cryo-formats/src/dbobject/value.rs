//! Document tree and typed accessors

use cryo_crypto::{ContentHash, Guid};

use super::error::{DbObjectError, DbObjectResult};

/// Node of a DbObject document
#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    /// Explicit null
    Null,
    /// Boolean
    Bool(bool),
    /// 32-bit integer
    Int(i32),
    /// 64-bit integer
    Long(i64),
    /// Single precision float
    Float(f32),
    /// Double precision float
    Double(f64),
    /// UTF-8 string
    String(String),
    /// GUID
    Guid(Guid),
    /// SHA-1 content hash
    Sha1(ContentHash),
    /// Raw bytes
    Blob(Vec<u8>),
    /// Ordered list of anonymous values
    List(Vec<DbValue>),
    /// Ordered key/value pairs
    Dict(DbDict),
}

impl DbValue {
    /// Name of this value's type for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Long(_) => "long",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::Guid(_) => "guid",
            Self::Sha1(_) => "sha1",
            Self::Blob(_) => "blob",
            Self::List(_) => "list",
            Self::Dict(_) => "dict",
        }
    }

    /// Borrow as a dict
    pub fn as_dict(&self) -> Option<&DbDict> {
        match self {
            Self::Dict(dict) => Some(dict),
            _ => None,
        }
    }

    /// Borrow as a list
    pub fn as_list(&self) -> Option<&[DbValue]> {
        match self {
            Self::List(list) => Some(list),
            _ => None,
        }
    }

    /// Convert to a typed value, naming `key` in the error
    pub fn to<'a, T: FromDbValue<'a>>(&'a self, key: &str) -> DbObjectResult<T> {
        T::from_db(self).ok_or_else(|| DbObjectError::TypeMismatch {
            key: key.to_string(),
            expected: T::EXPECTED,
            found: self.type_name(),
        })
    }
}

/// Types that can be borrowed or copied out of a [`DbValue`]
pub trait FromDbValue<'a>: Sized {
    /// Type name used in mismatch errors
    const EXPECTED: &'static str;

    /// Convert, returning `None` on a type mismatch
    fn from_db(value: &'a DbValue) -> Option<Self>;
}

impl FromDbValue<'_> for bool {
    const EXPECTED: &'static str = "bool";

    fn from_db(value: &DbValue) -> Option<Self> {
        match value {
            DbValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromDbValue<'_> for i32 {
    const EXPECTED: &'static str = "int";

    fn from_db(value: &DbValue) -> Option<Self> {
        match value {
            DbValue::Int(v) => Some(*v),
            DbValue::Long(v) => Self::try_from(*v).ok(),
            _ => None,
        }
    }
}

impl FromDbValue<'_> for u32 {
    const EXPECTED: &'static str = "int";

    // offsets and sizes are written as signed ints
    fn from_db(value: &DbValue) -> Option<Self> {
        match value {
            DbValue::Int(v) => Some(*v as u32),
            DbValue::Long(v) => Self::try_from(*v).ok(),
            _ => None,
        }
    }
}

impl FromDbValue<'_> for i64 {
    const EXPECTED: &'static str = "long";

    fn from_db(value: &DbValue) -> Option<Self> {
        match value {
            DbValue::Int(v) => Some(Self::from(*v)),
            DbValue::Long(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromDbValue<'_> for u64 {
    const EXPECTED: &'static str = "long";

    fn from_db(value: &DbValue) -> Option<Self> {
        match value {
            DbValue::Int(v) => Some(u64::from(*v as u32)),
            DbValue::Long(v) => Some(*v as u64),
            _ => None,
        }
    }
}

impl FromDbValue<'_> for f64 {
    const EXPECTED: &'static str = "double";

    fn from_db(value: &DbValue) -> Option<Self> {
        match value {
            DbValue::Float(v) => Some(Self::from(*v)),
            DbValue::Double(v) => Some(*v),
            _ => None,
        }
    }
}

impl<'a> FromDbValue<'a> for &'a str {
    const EXPECTED: &'static str = "string";

    fn from_db(value: &'a DbValue) -> Option<Self> {
        match value {
            DbValue::String(v) => Some(v),
            _ => None,
        }
    }
}

impl FromDbValue<'_> for Guid {
    const EXPECTED: &'static str = "guid";

    fn from_db(value: &DbValue) -> Option<Self> {
        match value {
            DbValue::Guid(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromDbValue<'_> for ContentHash {
    const EXPECTED: &'static str = "sha1";

    fn from_db(value: &DbValue) -> Option<Self> {
        match value {
            DbValue::Sha1(v) => Some(*v),
            _ => None,
        }
    }
}

impl<'a> FromDbValue<'a> for &'a [u8] {
    const EXPECTED: &'static str = "blob";

    fn from_db(value: &'a DbValue) -> Option<Self> {
        match value {
            DbValue::Blob(v) => Some(v),
            _ => None,
        }
    }
}

impl<'a> FromDbValue<'a> for &'a [DbValue] {
    const EXPECTED: &'static str = "list";

    fn from_db(value: &'a DbValue) -> Option<Self> {
        value.as_list()
    }
}

impl<'a> FromDbValue<'a> for &'a DbDict {
    const EXPECTED: &'static str = "dict";

    fn from_db(value: &'a DbValue) -> Option<Self> {
        value.as_dict()
    }
}

/// Ordered dictionary node
///
/// Keys keep document order so a written document matches the input
/// byte for byte. Lookups are linear; documents hold a handful of keys per
/// dict.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DbDict {
    entries: Vec<(String, DbValue)>,
}

impl DbDict {
    /// Create an empty dict
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<DbValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a key
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<DbValue>) {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// Raw lookup
    pub fn get(&self, key: &str) -> Option<&DbValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Whether the key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Typed lookup of a required key
    pub fn require<'a, T: FromDbValue<'a>>(&'a self, key: &str) -> DbObjectResult<T> {
        self.get(key)
            .ok_or_else(|| DbObjectError::Missing(key.to_string()))?
            .to(key)
    }

    /// Typed lookup of an optional key
    ///
    /// A missing key is `Ok(None)`; a present key of the wrong type is an
    /// error.
    pub fn opt<'a, T: FromDbValue<'a>>(&'a self, key: &str) -> DbObjectResult<Option<T>> {
        self.get(key).map(|value| value.to(key)).transpose()
    }

    /// Typed lookup with a default for a missing key
    pub fn get_or<'a, T: FromDbValue<'a>>(&'a self, key: &str, default: T) -> DbObjectResult<T> {
        Ok(self.opt(key)?.unwrap_or(default))
    }

    /// Iterate entries in document order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DbValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the dict is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for DbValue {
            fn from(value: $ty) -> Self {
                Self::$variant(value)
            }
        })*
    };
}

impl_from! {
    bool => Bool,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    String => String,
    Guid => Guid,
    ContentHash => Sha1,
    Vec<u8> => Blob,
    Vec<DbValue> => List,
    DbDict => Dict,
}

impl From<&str> for DbValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}
