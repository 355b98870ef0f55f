pub mod heap;

pub use heap::{Heap, HeapRecord, HEAP_BASE};
