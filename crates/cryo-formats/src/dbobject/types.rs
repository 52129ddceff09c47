//! Wire type codes

/// Type code mask of an entry's leading byte
pub(crate) const TYPE_MASK: u8 = 0x1F;

/// Flag marking an entry without a name (list items, document roots)
pub(crate) const ANONYMOUS: u8 = 0x80;

/// End of a list or dict
pub(crate) const END: u8 = 0x00;
pub(crate) const LIST: u8 = 0x01;
pub(crate) const DICT: u8 = 0x02;
pub(crate) const NULL: u8 = 0x04;
pub(crate) const BOOL: u8 = 0x06;
pub(crate) const STRING: u8 = 0x07;
pub(crate) const INT: u8 = 0x08;
pub(crate) const LONG: u8 = 0x09;
pub(crate) const FLOAT: u8 = 0x0B;
pub(crate) const DOUBLE: u8 = 0x0C;
pub(crate) const GUID: u8 = 0x0F;
pub(crate) const SHA1: u8 = 0x10;
pub(crate) const BLOB: u8 = 0x13;
