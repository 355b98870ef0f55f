use skipper_rs::{
    gc::{GarbageCollector, MarkSweep, RootProvider, RootSet},
    memory::{Heap, HEAP_BASE},
    value::{Address, ArrayLayout, ObjectDescriptor, SlotKind, Value},
};
use std::rc::Rc;

/// Header, one reference slot at offset 8, one data slot at offset 16.
const NODE_SIZE: usize = 24;

fn node() -> Rc<ObjectDescriptor> {
    Rc::new(ObjectDescriptor::class([8]))
}

/// Header plus two reference slots.
fn pair() -> Rc<ObjectDescriptor> {
    Rc::new(ObjectDescriptor::class([8, 16]))
}

/// Header plus two plain data slots.
fn plain() -> Rc<ObjectDescriptor> {
    Rc::new(ObjectDescriptor::class([]))
}

fn alloc(heap: &mut Heap, descriptor: &Rc<ObjectDescriptor>) -> Address {
    heap.allocate(Rc::clone(descriptor), NODE_SIZE).unwrap()
}

fn link(heap: &mut Heap, from: Address, offset: usize, to: Address) {
    heap.write_i64(from, offset, to.as_u64() as i64).unwrap();
}

fn roots(addresses: &[Address]) -> RootSet {
    let mut set = RootSet::new();
    for &a in addresses {
        set.add(Value::ObjectRef(a));
    }
    set
}

fn is_live(heap: &Heap, address: Address) -> bool {
    heap.find_object(address).is_some()
}

#[test]
fn no_roots_empties_heap() {
    let mut heap = Heap::new(4096);
    let node = node();
    for _ in 0..3 {
        alloc(&mut heap, &node);
    }

    let report = MarkSweep::new().collect(&mut heap, &RootSet::new());
    assert_eq!(report.freed_objects, 3);
    assert_eq!(report.freed_bytes, 3 * NODE_SIZE);
    assert_eq!(heap.object_count(), 0);
    assert_eq!(heap.live_bytes(), 0);
}

#[test]
fn rooted_object_survives() {
    let mut heap = Heap::new(4096);
    let a = alloc(&mut heap, &node());

    MarkSweep::new().collect(&mut heap, &roots(&[a]));
    assert_eq!(heap.object_count(), 1);
    assert!(is_live(&heap, a));
}

#[test]
fn reachability_follows_declared_edges() {
    let mut heap = Heap::new(4096);
    let node = node();
    let a = alloc(&mut heap, &node);
    let b = alloc(&mut heap, &node);
    let c = alloc(&mut heap, &node);
    let unreachable = alloc(&mut heap, &node);
    link(&mut heap, a, 8, b);
    link(&mut heap, b, 8, c);

    let report = MarkSweep::new().collect(&mut heap, &roots(&[a]));
    assert_eq!(report.marked, 3);
    assert!(is_live(&heap, a) && is_live(&heap, b) && is_live(&heap, c));
    assert!(!is_live(&heap, unreachable));
}

#[test]
fn unrooted_cycle_is_reclaimed() {
    let mut heap = Heap::new(4096);
    let node = node();
    let a = alloc(&mut heap, &node);
    let b = alloc(&mut heap, &node);
    link(&mut heap, a, 8, b);
    link(&mut heap, b, 8, a);

    let report = MarkSweep::new().collect(&mut heap, &RootSet::new());
    assert_eq!(report.freed_objects, 2);
    assert_eq!(heap.object_count(), 0);
}

#[test]
fn rooted_cycle_survives() {
    let mut heap = Heap::new(4096);
    let node = node();
    let a = alloc(&mut heap, &node);
    let b = alloc(&mut heap, &node);
    link(&mut heap, a, 8, b);
    link(&mut heap, b, 8, a);

    let report = MarkSweep::new().collect(&mut heap, &roots(&[b]));
    assert_eq!(report.marked, 2);
    assert_eq!(heap.object_count(), 2);
}

#[test]
fn self_reference_is_processed_once() {
    let mut heap = Heap::new(4096);
    let a = alloc(&mut heap, &node());
    link(&mut heap, a, 8, a);

    let report = MarkSweep::new().collect(&mut heap, &roots(&[a]));
    assert_eq!(report.marked, 1);
    assert!(is_live(&heap, a));
}

#[test]
fn repeated_collection_reclaims_nothing() {
    let mut heap = Heap::new(4096);
    let node = node();
    let a = alloc(&mut heap, &node);
    let b = alloc(&mut heap, &node);
    alloc(&mut heap, &node);
    link(&mut heap, a, 8, b);
    let roots = roots(&[a]);

    let mut gc = MarkSweep::new();
    let first = gc.collect(&mut heap, &roots);
    assert_eq!(first.freed_objects, 1);

    let second = gc.collect(&mut heap, &roots);
    assert_eq!(second.freed_objects, 0);
    assert_eq!(second.freed_bytes, 0);
    assert_eq!(second.marked, 2);
    assert_eq!(heap.object_count(), 2);
    assert_eq!(gc.stats().collections, 2);
    assert_eq!(gc.stats().objects_freed, 1);
}

#[test]
fn data_slots_are_never_followed() {
    let mut heap = Heap::new(4096);
    let holder = alloc(&mut heap, &plain());
    let target = alloc(&mut heap, &node());
    // both data slots hold a perfectly valid address
    link(&mut heap, holder, 8, target);
    link(&mut heap, holder, 16, target);

    MarkSweep::new().collect(&mut heap, &roots(&[holder]));
    assert!(is_live(&heap, holder));
    assert!(!is_live(&heap, target));
}

#[test]
fn only_declared_offset_is_followed() {
    let mut heap = Heap::new(4096);
    let node = node();
    let holder = alloc(&mut heap, &node);
    let referenced = alloc(&mut heap, &node);
    let lookalike = alloc(&mut heap, &node);
    link(&mut heap, holder, 8, referenced);
    link(&mut heap, holder, 16, lookalike);

    MarkSweep::new().collect(&mut heap, &roots(&[holder]));
    assert!(is_live(&heap, referenced));
    assert!(!is_live(&heap, lookalike));
}

#[test]
fn long_chain_is_retained_without_recursion() {
    const LENGTH: usize = 10_000;
    let mut heap = Heap::new(LENGTH * NODE_SIZE);
    let node = node();

    let head = alloc(&mut heap, &node);
    let mut tail = head;
    for _ in 1..LENGTH {
        let next = alloc(&mut heap, &node);
        link(&mut heap, tail, 8, next);
        tail = next;
    }
    assert_eq!(heap.free_bytes(), 0);

    let report = MarkSweep::new().collect(&mut heap, &roots(&[head]));
    assert_eq!(report.marked, LENGTH);
    assert_eq!(report.freed_objects, 0);
    assert_eq!(heap.object_count(), LENGTH);
}

#[test]
fn diamond_is_marked_once_per_object() {
    let mut heap = Heap::new(4096);
    let pair = pair();
    let top = alloc(&mut heap, &pair);
    let left = alloc(&mut heap, &pair);
    let right = alloc(&mut heap, &pair);
    let bottom = alloc(&mut heap, &pair);
    link(&mut heap, top, 8, left);
    link(&mut heap, top, 16, right);
    link(&mut heap, left, 8, bottom);
    link(&mut heap, right, 16, bottom);

    let report = MarkSweep::new().collect(&mut heap, &roots(&[top]));
    assert_eq!(report.marked, 4);
    assert_eq!(heap.object_count(), 4);
}

#[test]
fn shared_child_of_two_roots() {
    let mut heap = Heap::new(4096);
    let node = node();
    let first = alloc(&mut heap, &node);
    let second = alloc(&mut heap, &node);
    let child = alloc(&mut heap, &node);
    link(&mut heap, first, 8, child);
    link(&mut heap, second, 8, child);

    // the same root twice as well
    let report = MarkSweep::new().collect(&mut heap, &roots(&[first, second, first]));
    assert_eq!(report.marked, 3);
    assert!(is_live(&heap, child));
}

#[test]
fn garbage_roots_are_ignored() {
    let mut heap = Heap::new(4096);
    let a = alloc(&mut heap, &node());

    let bogus = roots(&[
        Address(0xDEAD_BEEF),
        Address(HEAP_BASE + 8), // interior of `a`
        Address(HEAP_BASE + 4096 * 2),
    ]);
    let report = MarkSweep::new().collect(&mut heap, &bogus);
    assert_eq!(report.marked, 0);
    assert!(!is_live(&heap, a));
}

#[test]
fn garbage_and_null_fields_are_skipped() {
    let mut heap = Heap::new(4096);
    let pair = pair();
    let a = alloc(&mut heap, &pair);
    let b = alloc(&mut heap, &pair);
    heap.write_i64(a, 8, 0x7777_0000).unwrap();
    // offset 16 of `a` stays null
    heap.write_i64(b, 8, 0).unwrap();

    let report = MarkSweep::new().collect(&mut heap, &roots(&[a]));
    assert_eq!(report.marked, 1);
    assert!(is_live(&heap, a));
    assert!(!is_live(&heap, b));
}

#[test]
fn dangling_field_after_free_is_ignored() {
    let mut heap = Heap::new(4096);
    let node = node();
    let a = alloc(&mut heap, &node);
    let b = alloc(&mut heap, &node);
    link(&mut heap, a, 8, b);

    let mut gc = MarkSweep::new();
    // drop `a`, keep `b`
    gc.collect(&mut heap, &roots(&[b]));
    assert!(!is_live(&heap, a));

    // `b` now points at freed memory
    link(&mut heap, b, 8, a);
    let report = gc.collect(&mut heap, &roots(&[b]));
    assert_eq!(report.marked, 1);
    assert_eq!(report.freed_objects, 0);
}

#[test]
fn reference_arrays_trace_up_to_their_length() {
    let mut heap = Heap::new(4096);
    let node = node();
    let array = heap
        .allocate(Rc::new(ObjectDescriptor::array(SlotKind::Reference)), 8 + 3 * 8)
        .unwrap();
    let first = alloc(&mut heap, &node);
    let beyond_length = alloc(&mut heap, &node);
    heap.write_i64(array, 0, 1).unwrap();
    link(&mut heap, array, 8, first);
    link(&mut heap, array, 16, beyond_length);

    MarkSweep::new().collect(&mut heap, &roots(&[array]));
    assert!(is_live(&heap, first));
    assert!(!is_live(&heap, beyond_length));
}

#[test]
fn int_arrays_are_not_traced() {
    let mut heap = Heap::new(4096);
    let array = heap
        .allocate(Rc::new(ObjectDescriptor::array(SlotKind::Int)), 8 + 8)
        .unwrap();
    let target = alloc(&mut heap, &node());
    heap.write_i64(array, 0, 1).unwrap();
    link(&mut heap, array, 8, target);

    MarkSweep::new().collect(&mut heap, &roots(&[array]));
    assert!(is_live(&heap, array));
    assert!(!is_live(&heap, target));
}

#[test]
fn untyped_arrays_trace_reference_tags_only() {
    let mut heap = Heap::new(4096);
    let layout = ArrayLayout::untyped();
    let array = heap
        .allocate(Rc::new(ObjectDescriptor::untyped_array()), layout.allocation_size(3).unwrap())
        .unwrap();
    let tagged = alloc(&mut heap, &node());
    let untagged = alloc(&mut heap, &node());
    heap.write_i64(array, 0, 3).unwrap();
    link(&mut heap, array, 8, tagged);
    // same bits, but tagged as an int
    link(&mut heap, array, 16, untagged);

    let (tag_offset, shift) = ArrayLayout::tag_position(3, 0);
    let tags = SlotKind::Reference.into_tag_word(0, shift);
    heap.write_i64(array, tag_offset, tags).unwrap();

    MarkSweep::new().collect(&mut heap, &roots(&[array]));
    assert!(is_live(&heap, tagged));
    assert!(!is_live(&heap, untagged));
}

#[test]
fn swept_space_is_reusable() {
    let mut heap = Heap::new(NODE_SIZE * 4);
    let node = node();
    for _ in 0..4 {
        alloc(&mut heap, &node);
    }
    assert!(!heap.has_space(NODE_SIZE));
    assert!(heap.allocate(Rc::clone(&node), NODE_SIZE).is_err());

    MarkSweep::new().collect(&mut heap, &RootSet::new());
    assert!(heap.has_space(NODE_SIZE * 4));
    let fresh = alloc(&mut heap, &node);
    assert_eq!(heap.read_i64(fresh, 8).unwrap(), 0);
}

struct Pinned(Vec<Address>);

impl RootProvider for Pinned {
    fn enumerate_roots(&self) -> Box<dyn Iterator<Item = Address> + '_> {
        Box::new(self.0.iter().copied())
    }
}

#[test]
fn custom_root_provider() {
    let mut heap = Heap::new(4096);
    let node = node();
    let kept = alloc(&mut heap, &node);
    let dropped = alloc(&mut heap, &node);

    let mut gc: Box<dyn GarbageCollector> = Box::new(MarkSweep::new());
    gc.collect(&mut heap, &Pinned(vec![kept]));
    assert!(is_live(&heap, kept));
    assert!(!is_live(&heap, dropped));
}

#[test]
fn root_set_removal_unpins() {
    let mut heap = Heap::new(4096);
    let a = alloc(&mut heap, &node());
    let mut set = roots(&[a]);
    let mut gc = MarkSweep::new();

    gc.collect(&mut heap, &set);
    assert!(is_live(&heap, a));

    assert!(set.remove(Value::ObjectRef(a)));
    assert!(set.is_empty());
    gc.collect(&mut heap, &set);
    assert!(!is_live(&heap, a));
}
