use crate::{
    error::MemoryError,
    utils::{align_up, WORD},
    value::{Address, ObjectDescriptor},
};
use std::{collections::BTreeMap, rc::Rc};

/// Address of the first byte of the arena. Keeping it non-zero means no live
/// object can ever be confused with the null reference.
pub const HEAP_BASE: u64 = 0x1000;

#[derive(Clone, Debug)]
pub struct HeapRecord {
    pub address: Address,
    pub descriptor: Rc<ObjectDescriptor>,
    pub size: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct FreeBlock {
    offset: usize,
    size: usize,
}

impl FreeBlock {
    fn end(&self) -> usize {
        self.offset + self.size
    }
}

/// Fixed-capacity byte arena with a first-fit free list.
///
/// Every live object has exactly one [`HeapRecord`] keyed by its address.
/// Addresses never move; freed blocks are zeroed and merged back into their
/// neighbours.
pub struct Heap {
    memory: Vec<u8>,
    free_list: Vec<FreeBlock>,
    objects: BTreeMap<Address, HeapRecord>,
    live_bytes: usize,
}

impl Heap {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity - capacity % WORD;
        let free_list = if capacity > 0 {
            vec![FreeBlock {
                offset: 0,
                size: capacity,
            }]
        } else {
            vec![]
        };
        Self {
            memory: vec![0; capacity],
            free_list,
            objects: BTreeMap::new(),
            live_bytes: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.memory.len()
    }

    pub fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    pub fn free_bytes(&self) -> usize {
        self.capacity() - self.live_bytes
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Whether `bytes` more would fit under the capacity. Fragmentation can
    /// still make the following [`Heap::allocate`] fail.
    pub fn has_space(&self, bytes: usize) -> bool {
        Self::block_size(bytes)
            .and_then(|block| self.live_bytes.checked_add(block))
            .is_some_and(|needed| needed <= self.capacity())
    }

    fn block_size(bytes: usize) -> Option<usize> {
        align_up(bytes.max(WORD), WORD)
    }

    pub fn allocate(
        &mut self,
        descriptor: Rc<ObjectDescriptor>,
        requested: usize,
    ) -> Result<Address, MemoryError> {
        let Some(size) = Self::block_size(requested) else {
            return Err(MemoryError::OutOfMemory {
                requested,
                available: self.free_bytes(),
            });
        };
        let out_of_memory = MemoryError::OutOfMemory {
            requested: size,
            available: self.free_bytes(),
        };

        let Some(index) = self.free_list.iter().position(|b| b.size >= size) else {
            return Err(out_of_memory);
        };
        let block = self.free_list[index];
        if block.size == size {
            self.free_list.remove(index);
        } else {
            self.free_list[index] = FreeBlock {
                offset: block.offset + size,
                size: block.size - size,
            };
        }

        // freed blocks are zeroed on release, so new objects start zeroed
        let address = Address(HEAP_BASE + block.offset as u64);
        self.objects.insert(
            address,
            HeapRecord {
                address,
                descriptor,
                size,
            },
        );
        self.live_bytes += size;
        Ok(address)
    }

    /// Releases a live object, returning its size.
    pub(crate) fn free(&mut self, address: Address) -> Option<usize> {
        let record = self.objects.remove(&address)?;
        let offset = self.offset_of(address)?;
        self.memory[offset..offset + record.size].fill(0);
        self.live_bytes -= record.size;
        self.release(FreeBlock {
            offset,
            size: record.size,
        });
        Some(record.size)
    }

    fn release(&mut self, block: FreeBlock) {
        let index = self.free_list.partition_point(|b| b.offset < block.offset);
        self.free_list.insert(index, block);

        if index + 1 < self.free_list.len() && self.free_list[index].end() == self.free_list[index + 1].offset {
            self.free_list[index].size += self.free_list[index + 1].size;
            self.free_list.remove(index + 1);
        }
        if index > 0 && self.free_list[index - 1].end() == self.free_list[index].offset {
            self.free_list[index - 1].size += self.free_list[index].size;
            self.free_list.remove(index);
        }
    }

    fn offset_of(&self, address: Address) -> Option<usize> {
        let offset = address.as_u64().checked_sub(HEAP_BASE)?;
        usize::try_from(offset).ok()
    }

    /// Exact lookup of a live object. Garbage or interior addresses yield `None`.
    pub fn find_object(&self, address: Address) -> Option<&HeapRecord> {
        self.objects.get(&address)
    }

    pub fn objects(&self) -> impl Iterator<Item = &HeapRecord> + '_ {
        self.objects.values()
    }

    fn slot_range(&self, address: Address, offset: usize) -> Result<usize, MemoryError> {
        let violation = MemoryError::AccessViolation {
            address: address.as_u64(),
            offset,
        };
        let record = self.find_object(address).ok_or(violation.clone())?;
        match offset.checked_add(WORD) {
            Some(end) if end <= record.size => {}
            _ => return Err(violation),
        }
        let base = self.offset_of(address).ok_or(violation)?;
        Ok(base + offset)
    }

    pub fn read_i64(&self, address: Address, offset: usize) -> Result<i64, MemoryError> {
        let start = self.slot_range(address, offset)?;
        let mut bytes = [0u8; WORD];
        bytes.copy_from_slice(&self.memory[start..start + WORD]);
        Ok(i64::from_le_bytes(bytes))
    }

    pub fn write_i64(&mut self, address: Address, offset: usize, value: i64) -> Result<(), MemoryError> {
        let start = self.slot_range(address, offset)?;
        self.memory[start..start + WORD].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// The first word of a live object, if it has one.
    pub fn header(&self, address: Address) -> Option<i64> {
        self.read_i64(address, 0).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::SlotKind;

    fn desc() -> Rc<ObjectDescriptor> {
        Rc::new(ObjectDescriptor::class([]))
    }

    #[test]
    fn allocations_are_aligned_and_non_null() {
        let mut heap = Heap::new(256);
        let a = heap.allocate(desc(), 3).unwrap();
        let b = heap.allocate(desc(), 16).unwrap();
        assert!(!a.is_null());
        assert_eq!(heap.find_object(a).unwrap().size, 8);
        assert_eq!(b.as_u64() - a.as_u64(), 8);
        assert_eq!(heap.live_bytes(), 24);
        assert_eq!(heap.object_count(), 2);
    }

    #[test]
    fn zero_sized_requests_take_a_word() {
        let mut heap = Heap::new(64);
        let a = heap.allocate(desc(), 0).unwrap();
        assert_eq!(heap.find_object(a).unwrap().size, WORD);
    }

    #[test]
    fn exhausted_heap_reports_out_of_memory() {
        let mut heap = Heap::new(32);
        heap.allocate(desc(), 24).unwrap();
        assert!(!heap.has_space(16));
        assert_eq!(
            heap.allocate(desc(), 16),
            Err(MemoryError::OutOfMemory {
                requested: 16,
                available: 8
            })
        );
    }

    #[test]
    fn oversized_requests_never_fit() {
        let mut heap = Heap::new(64);
        heap.allocate(desc(), 8).unwrap();
        assert!(!heap.has_space(usize::MAX - 7));
        assert!(!heap.has_space(usize::MAX));
        assert_eq!(
            heap.allocate(desc(), usize::MAX),
            Err(MemoryError::OutOfMemory {
                requested: usize::MAX,
                available: 56
            })
        );
        assert!(matches!(
            heap.allocate(desc(), usize::MAX - 7),
            Err(MemoryError::OutOfMemory { .. })
        ));
        assert_eq!(heap.object_count(), 1);
    }

    #[test]
    fn freed_memory_is_zeroed_and_reused() {
        let mut heap = Heap::new(64);
        let a = heap.allocate(desc(), 16).unwrap();
        heap.write_i64(a, 8, 77).unwrap();
        assert_eq!(heap.free(a), Some(16));
        assert!(heap.find_object(a).is_none());

        let b = heap.allocate(desc(), 16).unwrap();
        assert_eq!(a, b);
        assert_eq!(heap.read_i64(b, 8), Ok(0));
    }

    #[test]
    fn neighbouring_blocks_coalesce() {
        let mut heap = Heap::new(48);
        let a = heap.allocate(desc(), 16).unwrap();
        let b = heap.allocate(desc(), 16).unwrap();
        let c = heap.allocate(desc(), 16).unwrap();
        heap.free(a);
        heap.free(c);
        heap.free(b);
        assert_eq!(heap.free_bytes(), 48);
        let whole = heap.allocate(desc(), 48).unwrap();
        assert_eq!(whole, a);
    }

    #[test]
    fn slot_access_is_bounds_checked() {
        let mut heap = Heap::new(64);
        let a = heap.allocate(Rc::new(ObjectDescriptor::array(SlotKind::Int)), 16).unwrap();
        assert!(heap.write_i64(a, 8, -5).is_ok());
        assert_eq!(heap.read_i64(a, 8), Ok(-5));
        assert!(matches!(
            heap.read_i64(a, 16),
            Err(MemoryError::AccessViolation { offset: 16, .. })
        ));
        assert!(heap.read_i64(Address(a.as_u64() + 8), 0).is_err());
        assert!(heap.read_i64(Address::NULL, 0).is_err());
    }
}
