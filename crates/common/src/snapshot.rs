//! Owned, in-memory `HeapProvider` over a [`HeapImage`].

use crate::image::{HeapImage, ObjectRecord};
use crate::{FieldValue, HeapAddress, HeapProvider, ObjectHandle, RootEntry};
use std::collections::HashMap;

/// Heap provider backed by a deserialized image held in memory.
///
/// Used when the image was authored in-process (tests, the bake tool) rather
/// than mapped from disk.
#[derive(Debug, Clone, Default)]
pub struct SnapshotHeap {
    image: HeapImage,
    index: HashMap<u64, usize>,
}

impl SnapshotHeap {
    /// Indexes `image` by address. Later duplicates shadow earlier ones.
    pub fn new(image: HeapImage) -> Self {
        let index = image
            .objects
            .iter()
            .enumerate()
            .map(|(i, o)| (o.address, i))
            .collect();
        Self { image, index }
    }

    fn record(&self, address: HeapAddress) -> Option<&ObjectRecord> {
        self.index
            .get(&address.get())
            .map(|&i| &self.image.objects[i])
    }
}

impl From<HeapImage> for SnapshotHeap {
    fn from(image: HeapImage) -> Self {
        Self::new(image)
    }
}

impl HeapProvider for SnapshotHeap {
    fn objects(&self) -> Box<dyn Iterator<Item = ObjectHandle> + '_> {
        Box::new(
            self.image
                .objects
                .iter()
                .map(|o| ObjectHandle::new(HeapAddress(o.address), o.type_name.as_str())),
        )
    }

    fn read_field(&self, object: &ObjectHandle, field: &str) -> Option<FieldValue> {
        self.record(object.address)?
            .fields
            .iter()
            .find(|f| f.name == field)
            .map(|f| f.value)
    }

    fn roots(&self) -> Vec<RootEntry> {
        self.image
            .roots
            .iter()
            .filter_map(|root| {
                let address = HeapAddress(root.address);
                match self.handle(address) {
                    Some(object) => Some(RootEntry {
                        object,
                        kind: root.kind,
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
        self.record(object.address)
            .map(|r| r.references.iter().copied().map(HeapAddress).collect())
            .unwrap_or_default()
    }

    fn resolve_type(&self, address: HeapAddress) -> Option<String> {
        self.record(address).map(|r| r.type_name.clone())
    }
}
