//! DbObject structured documents
//!
//! DbObject is Frostbite's self-describing binary document format: typed
//! entries (ints, strings, blobs, GUIDs, hashes) nested in named dicts and
//! anonymous lists. Layout files, install manifests, the initfs and
//! Dynamic2018 TOC and bundle metadata are all DbObject documents.
//!
//! Each entry starts with a type byte. Bit 7 marks an entry without a name;
//! otherwise a null-terminated name follows. Containers carry a 7-bit varint
//! byte length and end with a zero byte.
//!
//! Accessors on [`DbDict`] fail on a type mismatch and return the supplied
//! default only when a key is absent.

mod error;
mod reader;
mod types;
mod value;
mod writer;

pub use error::{DbObjectError, DbObjectResult};
pub use reader::{DbReader, MAX_DEPTH, read_dict, read_document};
pub use value::{DbDict, DbValue, FromDbValue};
pub use writer::DbWriter;
