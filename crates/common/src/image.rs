//! # Heap Image: Disk-Backed Snapshot Format
//!
//! Stores a captured heap (objects, fields, outgoing references, roots) via
//! `rkyv` zero-copy serialization. `MappedImage` opens it with `mmap` and
//! serves `HeapProvider` lookups straight from the archive.

use crate::{
    FieldValue, HeapAddress, HeapError, HeapProvider, ObjectHandle, RootEntry, RootKind,
};
use memmap2::Mmap;
use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// A named field and its raw value.
#[derive(Debug, Clone, PartialEq, Archive, Deserialize, Serialize, SerdeSerialize, SerdeDeserialize)]
#[rkyv(derive(Debug))]
pub struct FieldRecord {
    pub name: String,
    pub value: FieldValue,
}

/// Single object in the image.
#[derive(Debug, Clone, PartialEq, Archive, Deserialize, Serialize, SerdeSerialize, SerdeDeserialize)]
#[rkyv(derive(Debug))]
pub struct ObjectRecord {
    pub address: u64,
    pub type_name: String,
    #[serde(default)]
    pub fields: Vec<FieldRecord>,
    /// Outgoing references, one entry per referencing slot.
    #[serde(default)]
    pub references: Vec<u64>,
}

/// Single root entry in the image.
#[derive(Debug, Clone, PartialEq, Archive, Deserialize, Serialize, SerdeSerialize, SerdeDeserialize)]
#[rkyv(derive(Debug))]
pub struct RootRecord {
    pub address: u64,
    #[serde(default)]
    pub kind: RootKind,
}

/// In-memory heap image, serializable to disk.
#[derive(
    Debug, Clone, Default, PartialEq, Archive, Deserialize, Serialize, SerdeSerialize, SerdeDeserialize,
)]
#[rkyv(derive(Debug))]
pub struct HeapImage {
    #[serde(default)]
    pub objects: Vec<ObjectRecord>,
    #[serde(default)]
    pub roots: Vec<RootRecord>,
}

impl HeapImage {
    /// Creates a new empty image.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sorts objects by address (required for binary search after archiving).
    pub fn sort(&mut self) {
        self.objects.sort_by_key(|o| o.address);
    }

    /// Returns the first address that appears on more than one object, if any.
    pub fn duplicate_address(&self) -> Option<u64> {
        let mut addresses: Vec<u64> = self.objects.iter().map(|o| o.address).collect();
        addresses.sort_unstable();
        addresses.windows(2).find(|w| w[0] == w[1]).map(|w| w[0])
    }

    /// Sorts objects by address and serializes the image using `rkyv`.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>, HeapError> {
        self.sort();
        let aligned = rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map_err(|e| HeapError::CorruptImage(e.to_string()))?;
        Ok(aligned.to_vec())
    }

    /// Saves the image to a file (sorts by address before writing).
    pub fn save(&mut self, path: &Path) -> Result<(), HeapError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = self.to_bytes()?;
        let mut file = File::create(path)?;
        file.write_all(&bytes)?;
        Ok(())
    }
}

/// Memory-mapped read-only image handle.
///
/// The mapping lives exactly as long as this value; dropping it releases the
/// image on every exit path.
pub struct MappedImage {
    mmap: Mmap,
}

impl MappedImage {
    /// Opens an image file via mmap and validates the archive once.
    ///
    /// # Errors
    /// - `HeapError::ImageUnavailable` if the path is missing or unreadable.
    /// - `HeapError::CorruptImage` if the bytes are not a valid heap image, or
    ///   the objects are not strictly ordered by address.
    pub fn open(path: &Path) -> Result<Self, HeapError> {
        let unavailable = |source| HeapError::ImageUnavailable {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(unavailable)?;
        // SAFETY: the mapping is read-only and never handed out mutably.
        let mmap = unsafe { Mmap::map(&file) }.map_err(unavailable)?;

        let archived = rkyv::access::<ArchivedHeapImage, rkyv::rancor::Error>(&mmap)
            .map_err(|e| HeapError::CorruptImage(e.to_string()))?;
        // Lookups binary-search by address.
        if let Some(w) = archived
            .objects
            .windows(2)
            .find(|w| w[0].address.to_native() >= w[1].address.to_native())
        {
            return Err(HeapError::CorruptImage(format!(
                "objects not strictly ordered by address at {} -> {}",
                w[0].address.to_native(),
                w[1].address.to_native()
            )));
        }

        let image = Self { mmap };
        tracing::debug!(
            path = %path.display(),
            objects = image.len(),
            roots = image.archived().roots.len(),
            "mapped heap image"
        );
        Ok(image)
    }

    /// Returns a reference to the archived image (zero-copy).
    pub fn archived(&self) -> &ArchivedHeapImage {
        // SAFETY: validated in `open()` via rkyv::access; the mmap is held for
        // the lifetime of self and is never written.
        unsafe { rkyv::access_unchecked::<ArchivedHeapImage>(&self.mmap[..]) }
    }

    /// Finds an object by address (binary search; requires sorted image).
    pub fn find(&self, address: HeapAddress) -> Option<&ArchivedObjectRecord> {
        let objects = &self.archived().objects;
        let idx = objects
            .binary_search_by_key(&address.get(), |o| o.address.to_native())
            .ok()?;
        Some(&objects[idx])
    }

    /// Returns the number of objects.
    pub fn len(&self) -> usize {
        self.archived().objects.len()
    }

    /// Returns `true` if the image holds no objects.
    pub fn is_empty(&self) -> bool {
        self.archived().objects.is_empty()
    }
}

fn archived_handle(record: &ArchivedObjectRecord) -> ObjectHandle {
    ObjectHandle::new(
        HeapAddress(record.address.to_native()),
        record.type_name.as_str(),
    )
}

impl HeapProvider for MappedImage {
    fn objects(&self) -> Box<dyn Iterator<Item = ObjectHandle> + '_> {
        Box::new(self.archived().objects.iter().map(archived_handle))
    }

    fn read_field(&self, object: &ObjectHandle, field: &str) -> Option<FieldValue> {
        let record = self.find(object.address)?;
        let archived = record
            .fields
            .iter()
            .find(|f| f.name.as_str() == field)?;
        rkyv::deserialize::<FieldValue, rkyv::rancor::Error>(&archived.value).ok()
    }

    fn roots(&self) -> Vec<RootEntry> {
        self.archived()
            .roots
            .iter()
            .filter_map(|root| {
                let address = HeapAddress(root.address.to_native());
                let kind = rkyv::deserialize::<RootKind, rkyv::rancor::Error>(&root.kind)
                    .unwrap_or_default();
                match self.find(address) {
                    Some(record) => Some(RootEntry {
                        object: archived_handle(record),
                        kind,
                    }),
                    None => {
                        tracing::debug!(%address, "dropping root with unresolved type");
                        None
                    }
                }
            })
            .collect()
    }

    fn references(&self, object: &ObjectHandle) -> Vec<HeapAddress> {
        self.find(object.address)
            .map(|record| {
                record
                    .references
                    .iter()
                    .map(|r| HeapAddress(r.to_native()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn resolve_type(&self, address: HeapAddress) -> Option<String> {
        self.find(address).map(|r| r.type_name.as_str().to_string())
    }
}
