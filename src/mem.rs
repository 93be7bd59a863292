//! Dynamic memory allocation.
//!
//! First-fit allocator with boundary-tag liberation, after Knuth
//! (TAOCP vol. 1, algorithms A and C). The heap is carved into
//! contiguous blocks, each framed by a header and a footer tag carrying
//! the block size and an allocated bit:
//!
//! ```text
//!   allocated block              free block
//! +------+-----------------+   +------+-----------------+
//! | size | allocated flag  |   | size | allocated flag  | <- header tag
//! +------+-----------------+   +------+-----------------+
//! |                        |   | free list links        | <- payload or
//! .       payload          .   +------------------------+    free node
//! .                        .   .                        .
//! +------+-----------------+   +------+-----------------+
//! | size | allocated flag  |   | size | allocated flag  | <- footer tag
//! +------+-----------------+   +------+-----------------+
//! ```
//!
//! The footer exists for liberation: merging with the predecessor block
//! requires knowing its size, which is read from the word just below the
//! current header. Free blocks store their free-list links in the
//! payload, which is what dictates the minimum block size.
//!
//! All block sizes and the heap region itself are multiples of the
//! configured alignment, so every payload is aligned and the low bit of
//! a tag is free to carry the allocated flag.
//!
//! Mutations are serialized by a sleeping mutex; allocation must never
//! be attempted from interrupt context.

use core::mem::{align_of, size_of};
use core::ptr::NonNull;

use crate::config::HEAP_ALIGN;
use crate::errors::{Error, Result};
use crate::list::{Link, Linked, List};
use crate::sync::Mutex;

const BTAG_ALLOCATED_MASK: usize = 0x1;
const BTAG_SIZE_MASK: usize = !BTAG_ALLOCATED_MASK;

/// Space a boundary tag occupies inside a block. The tag value itself is
/// one word; padding it to the alignment keeps payloads aligned.
const BTAG_SIZE: usize = HEAP_ALIGN;

/// Smallest block the allocator will carve: two boundary tags plus room
/// for the free-list node that occupies the payload of a free block.
const MIN_BLOCK_SIZE: usize = p2round(2 * BTAG_SIZE + size_of::<FreeNode>(), HEAP_ALIGN);

const _: () = assert!(align_of::<FreeNode>() <= HEAP_ALIGN);

pub(crate) const fn p2aligned(value: usize, align: usize) -> bool {
    value & (align - 1) == 0
}

pub(crate) const fn p2round(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Free-list node, stored in the payload of free blocks.
struct FreeNode {
    link: Link<FreeNode>,
}

unsafe impl Linked for FreeNode {
    fn link(&self) -> &Link<Self> {
        &self.link
    }
}

struct Heap {
    base: *mut u8,
    size: usize,
    free_list: List<FreeNode>,
}

// The heap is only reachable through the mutex below.
unsafe impl Send for Heap {}

static HEAP: Mutex<Option<Heap>> = Mutex::new(None);

unsafe fn btag_read(tag: *mut u8) -> usize {
    unsafe { (tag as *mut usize).read() }
}

unsafe fn btag_write(tag: *mut u8, value: usize) {
    unsafe { (tag as *mut usize).write(value) }
}

unsafe fn block_size(block: *mut u8) -> usize {
    unsafe { btag_read(block) & BTAG_SIZE_MASK }
}

unsafe fn block_footer(block: *mut u8) -> *mut u8 {
    unsafe { block.add(block_size(block) - BTAG_SIZE) }
}

unsafe fn block_allocated(block: *mut u8) -> bool {
    unsafe { btag_read(block) & BTAG_ALLOCATED_MASK != 0 }
}

unsafe fn block_set_allocated(block: *mut u8) {
    unsafe {
        let footer = block_footer(block);
        btag_write(block, btag_read(block) | BTAG_ALLOCATED_MASK);
        btag_write(footer, btag_read(footer) | BTAG_ALLOCATED_MASK);
    }
}

unsafe fn block_clear_allocated(block: *mut u8) {
    unsafe {
        let footer = block_footer(block);
        btag_write(block, btag_read(block) & !BTAG_ALLOCATED_MASK);
        btag_write(footer, btag_read(footer) & !BTAG_ALLOCATED_MASK);
    }
}

/// Stamp both tags of a block with the given size, allocated.
unsafe fn block_init(block: *mut u8, size: usize) {
    unsafe {
        btag_write(block, size | BTAG_ALLOCATED_MASK);
        btag_write(block.add(size - BTAG_SIZE), size | BTAG_ALLOCATED_MASK);
    }
}

/// Detect tag corruption. The two tags of a block agree at all times.
unsafe fn block_check(block: *mut u8) {
    unsafe {
        let header = btag_read(block);
        let footer = btag_read(block_footer(block));
        assert!(header == footer, "mem: boundary tag mismatch");
        assert!(p2aligned(header & BTAG_SIZE_MASK, HEAP_ALIGN));
    }
}

unsafe fn block_payload(block: *mut u8) -> *mut u8 {
    unsafe { block.add(BTAG_SIZE) }
}

unsafe fn block_from_payload(payload: *mut u8) -> *mut u8 {
    unsafe { payload.sub(BTAG_SIZE) }
}

impl Heap {
    fn end_addr(&self) -> usize {
        self.base as usize + self.size
    }

    unsafe fn block_inside(&self, block: *mut u8) -> bool {
        block >= self.base
            && unsafe { (block_payload(block) as usize) < self.end_addr() }
            && unsafe { block as usize + block_size(block) <= self.end_addr() }
    }

    /// Predecessor by address, read through its footer tag.
    unsafe fn block_prev(&self, block: *mut u8) -> Option<*mut u8> {
        if block == self.base {
            return None;
        }

        unsafe {
            let prev_size = btag_read(block.sub(BTAG_SIZE)) & BTAG_SIZE_MASK;
            Some(block.sub(prev_size))
        }
    }

    /// Successor by address.
    unsafe fn block_next(&self, block: *mut u8) -> Option<*mut u8> {
        let next = unsafe { block.add(block_size(block)) };

        if next as usize == self.end_addr() {
            None
        } else {
            Some(next)
        }
    }

    unsafe fn free_add(&self, block: *mut u8) {
        unsafe {
            assert!(block_allocated(block));
            block_clear_allocated(block);

            let node = block_payload(block) as *mut FreeNode;
            node.write(FreeNode { link: Link::new() });

            // Head insertion: a freshly freed block is the most likely
            // to still be cache-hot, and first-fit scans from the head.
            self.free_list.push_front(NonNull::new_unchecked(node));
        }
    }

    unsafe fn free_remove(&self, block: *mut u8) {
        unsafe {
            assert!(!block_allocated(block));

            let node = block_payload(block) as *mut FreeNode;
            self.free_list.remove(NonNull::new_unchecked(node));
            block_set_allocated(block);
        }
    }

    /// First-fit search, O(n) in the number of free blocks.
    unsafe fn free_find(&self, size: usize) -> Option<*mut u8> {
        for node in unsafe { self.free_list.iter() } {
            let block = unsafe { block_from_payload(node.as_ptr() as *mut u8) };

            if unsafe { block_size(block) } >= size {
                return Some(block);
            }
        }

        None
    }

    /// Carve `size` bytes off the front of an allocated block, returning
    /// the remainder when it is large enough to stand alone.
    unsafe fn block_split(&self, block: *mut u8, size: usize) -> Option<*mut u8> {
        unsafe {
            assert!(block_allocated(block));
            assert!(p2aligned(size, HEAP_ALIGN));

            let total = block_size(block);

            if total < size + MIN_BLOCK_SIZE {
                return None;
            }

            block_init(block, size);
            let rest = block.add(size);
            block_init(rest, total - size);
            Some(rest)
        }
    }

    /// Merge two neighbouring blocks if both are free.
    unsafe fn block_merge(&self, block1: *mut u8, block2: *mut u8) -> Option<*mut u8> {
        unsafe {
            if block_allocated(block1) || block_allocated(block2) {
                return None;
            }

            self.free_remove(block1);
            self.free_remove(block2);

            let size = block_size(block1) + block_size(block2);
            let first = if block1 < block2 { block1 } else { block2 };

            block_init(first, size);
            self.free_add(first);
            Some(first)
        }
    }
}

fn heap_mut<'a>(guard: &'a mut Option<Heap>) -> &'a mut Heap {
    match guard.as_mut() {
        Some(heap) => heap,
        None => panic!("mem: not initialized"),
    }
}

/// Round a payload size up to a block size.
fn convert_to_block_size(size: usize) -> Option<usize> {
    let size = size.checked_add(HEAP_ALIGN - 1)? & !(HEAP_ALIGN - 1);
    let size = size.checked_add(2 * BTAG_SIZE)?;
    Some(if size < MIN_BLOCK_SIZE { MIN_BLOCK_SIZE } else { size })
}

/// Initialize the allocator over the given region, which becomes a
/// single free block.
///
/// The region must be aligned to the configured heap alignment, sized a
/// multiple of it, and large enough for at least one block; anything
/// else is [`Error::InvalidArgument`]. Reinitialization is a contract
/// violation. The thread module must be bootstrapped first, since the
/// heap mutex needs a current-thread context.
pub fn setup(region: &'static mut [u8]) -> Result<()> {
    let base = region.as_mut_ptr();
    let size = region.len();

    if size < MIN_BLOCK_SIZE
        || !p2aligned(base as usize, HEAP_ALIGN)
        || !p2aligned(size, HEAP_ALIGN)
    {
        return Err(Error::InvalidArgument);
    }

    let mut guard = HEAP.lock();
    assert!(guard.is_none(), "mem: already initialized");

    let heap = Heap {
        base,
        size,
        free_list: List::new(),
    };

    unsafe {
        block_init(base, size);
        heap.free_add(base);
    }

    *guard = Some(heap);
    Ok(())
}

/// Allocate `size` bytes.
///
/// Returns a payload pointer aligned to the heap alignment, or `None`
/// when the request is zero-sized or cannot be satisfied.
pub fn alloc(size: usize) -> Option<NonNull<u8>> {
    if size == 0 {
        return None;
    }

    let size = convert_to_block_size(size)?;

    let mut guard = HEAP.lock();
    let heap = heap_mut(&mut *guard);

    let block = unsafe { heap.free_find(size) }?;

    unsafe {
        heap.free_remove(block);

        if let Some(rest) = heap.block_split(block, size) {
            heap.free_add(rest);
        }
    }

    drop(guard);

    let payload = unsafe { block_payload(block) };
    debug_assert!(p2aligned(payload as usize, HEAP_ALIGN));
    NonNull::new(payload)
}

/// Release an allocation. `ptr` may be null, in which case nothing
/// happens. Neighbouring free blocks are merged, so two adjacent free
/// blocks never persist past this call.
///
/// # Safety
///
/// A non-null `ptr` must come from [`alloc`] and must not have been
/// freed already.
pub unsafe fn free(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }

    assert!(p2aligned(ptr as usize, HEAP_ALIGN));

    let block = unsafe { block_from_payload(ptr) };

    let mut guard = HEAP.lock();
    let heap = heap_mut(&mut *guard);

    unsafe {
        assert!(heap.block_inside(block));
        block_check(block);

        heap.free_add(block);

        let mut block = block;

        if let Some(prev) = heap.block_prev(block) {
            if let Some(merged) = heap.block_merge(block, prev) {
                block = merged;
            }
        }

        if let Some(next) = heap.block_next(block) {
            heap.block_merge(block, next);
        }
    }
}
