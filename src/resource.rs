// Buffer registry - stable handles for GPU resources
//
// Generation-checked slot table: handles stay valid-looking forever, but a
// stale handle (resource retired, slot reused) resolves to None instead of
// aliasing the new occupant. Double-free is structurally impossible because
// removal moves the entry out of the table.

use crate::backend::{BufferUsage, QueueKind};

/// Opaque, copyable reference to a registered buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle {
    index: u32,
    generation: u32,
}

impl BufferHandle {
    /// A handle that never resolves. Placeholder for not-yet-registered data.
    pub fn dangling() -> Self {
        Self {
            index: u32::MAX,
            generation: 0,
        }
    }
}

/// Registry entry for one GPU buffer. The device-local allocation is created
/// lazily on first upload; `last_queue` records which queue most recently
/// touched the buffer, which decides where its deletion guard gets armed.
#[derive(Debug)]
pub struct BufferEntry<T> {
    pub gpu: Option<T>,
    pub size: u64,
    pub usage: BufferUsage,
    pub last_queue: QueueKind,
}

struct Slot<T> {
    generation: u32,
    entry: Option<BufferEntry<T>>,
}

/// Arena of buffer entries addressed by generational handles.
pub struct BufferTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Default for BufferTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BufferTable<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn insert(&mut self, entry: BufferEntry<T>) -> BufferHandle {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            BufferHandle {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                entry: Some(entry),
            });
            BufferHandle {
                index,
                generation: 0,
            }
        }
    }

    pub fn get(&self, handle: BufferHandle) -> Option<&BufferEntry<T>> {
        self.slots
            .get(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.entry.as_ref())
    }

    pub fn get_mut(&mut self, handle: BufferHandle) -> Option<&mut BufferEntry<T>> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.entry.as_mut())
    }

    /// Removes the entry, invalidating every copy of the handle.
    pub fn remove(&mut self, handle: BufferHandle) -> Option<BufferEntry<T>> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation)?;
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        Some(entry)
    }

    /// Drains every live entry (shutdown path).
    pub fn drain(&mut self) -> Vec<BufferEntry<T>> {
        let mut out = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(entry) = slot.entry.take() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
                out.push(entry);
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(v: u32) -> BufferEntry<u32> {
        BufferEntry {
            gpu: Some(v),
            size: 16,
            usage: BufferUsage::Vertex,
            last_queue: QueueKind::Transfer,
        }
    }

    #[test]
    fn insert_get_remove() {
        let mut table = BufferTable::new();
        let h = table.insert(entry(7));
        assert_eq!(table.get(h).and_then(|e| e.gpu), Some(7));
        let removed = table.remove(h).unwrap();
        assert_eq!(removed.gpu, Some(7));
        assert!(table.get(h).is_none());
        assert!(table.remove(h).is_none());
    }

    #[test]
    fn stale_handle_does_not_alias_reused_slot() {
        let mut table = BufferTable::new();
        let old = table.insert(entry(1));
        table.remove(old);
        let new = table.insert(entry(2));
        assert!(table.get(old).is_none());
        assert_eq!(table.get(new).and_then(|e| e.gpu), Some(2));
    }

    #[test]
    fn dangling_never_resolves() {
        let table: BufferTable<u32> = BufferTable::new();
        assert!(table.get(BufferHandle::dangling()).is_none());
    }
}
