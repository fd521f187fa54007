//! Reusable packet buffers.
//!
//! A scheduling context keeps up to three packet-sized scratch buffers
//! alive across collective calls. A call whose context buffers are missing
//! or undersized borrows nothing and runs on a call-local set instead,
//! dropped when the call ends, so repeated calls never grow the shared
//! allocation.

use std::alloc::{self, Layout};
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::slice;

/// Most buffers a pipeline variant ever needs at once.
pub const POOL_BUFS: usize = 3;

#[derive(Debug, Default)]
pub struct PacketPool {
    slots: Vec<Vec<f64>>,
    /// Element capacity each slot was allocated with.
    capacity: usize,
}

/// Buffers handed to one collective call; returned via [`PacketPool::release`].
pub struct PacketLease {
    pub bufs: Vec<Vec<f64>>,
    shared: bool,
}

impl PacketPool {
    /// Allocate `nbufs` shared buffers of `capacity` elements up front.
    pub fn preallocate(&mut self, capacity: usize, nbufs: usize) {
        let nbufs = nbufs.min(POOL_BUFS);
        self.slots.clear();
        self.slots.extend((0..nbufs).map(|_| vec![0.0; capacity]));
        self.capacity = capacity;
    }

    /// Hand out `nbufs` buffers of at least `capacity` elements, reusing the
    /// shared set when it is large enough and numerous enough.
    pub fn acquire(&mut self, capacity: usize, nbufs: usize) -> PacketLease {
        if self.capacity >= capacity && self.slots.len() >= nbufs {
            PacketLease { bufs: std::mem::take(&mut self.slots), shared: true }
        } else {
            PacketLease { bufs: (0..nbufs).map(|_| vec![0.0; capacity]).collect(), shared: false }
        }
    }

    /// Return a lease; call-local buffers are dropped here. A shared lease
    /// that lost buffers to an aborted transfer is dropped too rather than
    /// put back short.
    pub fn release(&mut self, lease: PacketLease) {
        if lease.shared && lease.bufs.iter().all(|b| b.len() >= self.capacity) {
            self.slots = lease.bufs;
        } else if lease.shared {
            self.capacity = 0;
        }
    }
}

/// Heap allocation with caller-chosen alignment, usable as a `[f64]`.
///
/// The usable slice may start past the raw allocation; releasing is tied to
/// the raw allocation and its layout, handled by `Drop`.
pub struct AlignedBuf {
    ptr: NonNull<f64>,
    len: usize,
    layout: Layout,
}

impl AlignedBuf {
    /// Zeroed buffer of `len` doubles aligned to `align` bytes. Allocation
    /// failure is fatal; there is no degraded mode.
    pub fn zeroed(len: usize, align: usize) -> Self {
        let align = align.max(std::mem::align_of::<f64>());
        let layout = Layout::from_size_align(len.max(1) * std::mem::size_of::<f64>(), align)
            .expect("invalid packet buffer layout");
        // Safety: layout has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw as *mut f64) else {
            alloc::handle_alloc_error(layout);
        };
        Self { ptr, len, layout }
    }
}

impl Deref for AlignedBuf {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        // Safety: `ptr` covers `len` initialized doubles.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for AlignedBuf {
    fn deref_mut(&mut self) -> &mut [f64] {
        // Safety: as above, and we hold the unique handle.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        // Safety: allocated with exactly this layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr() as *mut u8, self.layout) };
    }
}

// Safety: AlignedBuf owns its allocation outright.
unsafe impl Send for AlignedBuf {}
unsafe impl Sync for AlignedBuf {}
