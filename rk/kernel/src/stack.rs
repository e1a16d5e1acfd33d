//! Thread stacks built from caller-supplied storage.
//!
//! The storage start is rounded up and its end rounded down to
//! [`STACK_ALIGNMENT`], so the usable stack may be slightly smaller than
//! the buffer handed in. [`Stack::size`] reports what is actually usable.

use core::fmt;
use core::marker::PhantomData;
use core::ptr::NonNull;
use core::slice;

use crate::arch::{EntryDescriptor, StackFrame, StackPointer, MIN_STACK_SIZE, STACK_ALIGNMENT};

/// Stack of one thread.
///
/// Holds the raw storage exclusively for as long as the thread exists and
/// gives it back through [`Stack::into_storage`].
pub struct Stack {
    storage: NonNull<u8>,
    storage_len: usize,
    start: usize,
    size: usize,
    _storage: PhantomData<&'static mut [u8]>,
}

// SAFETY: `Stack` is the unique owner of its `&'static mut` storage.
unsafe impl Send for Stack {}

impl Stack {
    /// Builds a stack for `entry` in `storage`.
    ///
    /// Zero-fills the aligned region, writes the initial frame at its top
    /// and returns the stack together with the initial stack pointer.
    ///
    /// Panics if the aligned region is smaller than [`MIN_STACK_SIZE`].
    pub fn new(storage: &'static mut [u8], entry: &EntryDescriptor) -> (Self, StackPointer) {
        let storage_len = storage.len();
        let base = storage.as_mut_ptr() as usize;
        let start = align_up(base, STACK_ALIGNMENT);
        let size = aligned_size(base, storage_len, start, STACK_ALIGNMENT);
        assert!(
            size >= MIN_STACK_SIZE,
            "stack of {size} usable bytes is below the {MIN_STACK_SIZE}-byte minimum"
        );

        let region = &mut storage[start - base..start - base + size];
        region.fill(0);
        let stack_pointer = StackFrame::write_initial(region, entry);

        let stack = Self {
            storage: NonNull::from(storage).cast(),
            storage_len,
            start,
            size,
            _storage: PhantomData,
        };
        (stack, stack_pointer)
    }

    /// Usable size in bytes, at most the storage length
    pub fn size(&self) -> usize {
        self.size
    }

    /// Length of the storage handed in
    pub fn storage_len(&self) -> usize {
        self.storage_len
    }

    /// Lowest usable address
    pub fn bottom(&self) -> usize {
        self.start
    }

    /// One past the highest usable address
    pub fn top(&self) -> usize {
        self.start + self.size
    }

    /// Whether `stack_pointer` lies inside the usable region
    pub fn contains(&self, stack_pointer: StackPointer) -> bool {
        (self.bottom()..=self.top()).contains(&stack_pointer.addr())
    }

    /// Gives the storage back.
    ///
    /// Only valid once no thread executes on this stack any more; the
    /// kernel calls it when reaping a terminated thread.
    pub(crate) fn into_storage(self) -> &'static mut [u8] {
        // SAFETY: rebuilt from the exclusive borrow taken in `new`, which
        // this value has owned ever since.
        unsafe { slice::from_raw_parts_mut(self.storage.as_ptr(), self.storage_len) }
    }
}

impl fmt::Debug for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stack")
            .field("bottom", &format_args!("{:#x}", self.bottom()))
            .field("size", &self.size)
            .field("storage_len", &self.storage_len)
            .finish()
    }
}

const fn align_up(addr: usize, alignment: usize) -> usize {
    (addr + alignment - 1) / alignment * alignment
}

/// Span from the aligned `start` to the end of the storage rounded down.
const fn aligned_size(base: usize, len: usize, start: usize, alignment: usize) -> usize {
    let end = (base + len) / alignment * alignment;
    end.saturating_sub(start)
}
