//! # Common: Heap Snapshot Data Model
//!
//! **Role**: Shared vocabulary between the state decoder (`anatomist`), the
//! reference path finder (`oracle`) and the command loop (`cli`).
//!
//! **Core Types**:
//! - `HeapAddress`: opaque object identity inside one captured image.
//! - `ObjectHandle` / `RootEntry`: an object plus its declared type name (and root kind).
//! - `FieldValue`: raw value read from a named field.
//! - `HeapProvider`: the read-only Heap Inspection Provider contract.
//!
//! Every value here is a read-only snapshot of one immutable memory image.

pub mod image;
pub mod snapshot;

pub use image::{HeapImage, MappedImage};
pub use snapshot::SnapshotHeap;

use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Errors surfaced by heap providers and the analyses built on them.
///
/// Only `ImageUnavailable` and `CorruptImage` are fatal; the per-object
/// variants are absorbed by callers so one malformed object never aborts a scan.
#[derive(Debug, thiserror::Error)]
pub enum HeapError {
    #[error("memory image unavailable: {}: {source}", .path.display())]
    ImageUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("memory image is corrupt: {0}")]
    CorruptImage(String),
    #[error("field `{field}` unavailable on object {object}")]
    FieldUnavailable { object: HeapAddress, field: String },
    #[error("type unresolved for object {0}")]
    TypeUnresolved(HeapAddress),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Location of an object in the captured image.
///
/// Only used as a node identifier and lookup key, never dereferenced.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, SerdeSerialize, SerdeDeserialize,
)]
#[serde(transparent)]
pub struct HeapAddress(pub u64);

impl HeapAddress {
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for HeapAddress {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for HeapAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for HeapAddress {
    type Err = std::num::ParseIntError;

    /// Parses a decimal address, or a hexadecimal one with a `0x` prefix.
    ///
    /// # Examples
    /// ```
    /// # use common::HeapAddress;
    /// assert_eq!("4096".parse::<HeapAddress>().unwrap(), HeapAddress(4096));
    /// assert_eq!("0x1000".parse::<HeapAddress>().unwrap(), HeapAddress(4096));
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16).map(Self),
            None => s.parse::<u64>().map(Self),
        }
    }
}

/// An object address paired with its fully-qualified declared type name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, SerdeSerialize)]
pub struct ObjectHandle {
    pub address: HeapAddress,
    pub type_name: String,
}

impl ObjectHandle {
    pub fn new(address: HeapAddress, type_name: impl Into<String>) -> Self {
        Self {
            address,
            type_name: type_name.into(),
        }
    }
}

/// Why the runtime keeps a root alive. Carried for reporting only.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Archive,
    Deserialize,
    Serialize,
    SerdeSerialize,
    SerdeDeserialize,
)]
#[rkyv(derive(Debug))]
#[repr(u8)]
pub enum RootKind {
    /// Local variable or temporary on a thread stack.
    Stack = 0,
    /// Static field of a loaded type.
    StaticVariable = 1,
    /// Strong GC handle.
    StrongHandle = 2,
    /// Pinned GC handle.
    PinnedHandle = 3,
    /// Async-pinned handle (overlapped I/O buffers).
    AsyncPinnedHandle = 4,
    /// Object waiting on the finalizer queue.
    FinalizerQueue = 5,
    #[default]
    Other = 6,
}

/// A garbage-collection root: the starting frontier of a reachability search.
#[derive(Debug, Clone, PartialEq, Eq, SerdeSerialize)]
pub struct RootEntry {
    pub object: ObjectHandle,
    pub kind: RootKind,
}

/// Raw value of an object field as stored in the image.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Archive, Deserialize, Serialize, SerdeSerialize, SerdeDeserialize,
)]
#[rkyv(derive(Debug))]
#[serde(tag = "type", content = "value")]
pub enum FieldValue {
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Boolean(bool),
    Object(u64),
    Null,
}

/// Read-only access to one captured memory image.
///
/// Implementations must be pure lookups: the image is immutable, so repeated
/// calls return the same answers and a failed read never succeeds on retry.
pub trait HeapProvider {
    /// Every live object in the snapshot. Order is unspecified.
    fn objects(&self) -> Box<dyn Iterator<Item = ObjectHandle> + '_>;

    /// Raw value of `field` on `object`, or `None` if the declared type has no
    /// such field or the value cannot be read.
    fn read_field(&self, object: &ObjectHandle, field: &str) -> Option<FieldValue>;

    /// The root set exposed by the image.
    fn roots(&self) -> Vec<RootEntry>;

    /// Every object directly referenced by `object`'s fields and elements.
    ///
    /// One entry per referencing slot: two fields pointing at the same object
    /// yield the address twice.
    fn references(&self, object: &ObjectHandle) -> Vec<HeapAddress>;

    /// Declared type name of the object at `address`.
    fn resolve_type(&self, address: HeapAddress) -> Option<String>;

    /// Convenience: resolves `address` into a full handle.
    fn handle(&self, address: HeapAddress) -> Option<ObjectHandle> {
        self.resolve_type(address)
            .map(|type_name| ObjectHandle::new(address, type_name))
    }

    /// Like [`handle`](Self::handle), but fails with `TypeUnresolved`.
    fn resolve(&self, address: HeapAddress) -> Result<ObjectHandle, HeapError> {
        self.handle(address)
            .ok_or(HeapError::TypeUnresolved(address))
    }
}
