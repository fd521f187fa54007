use crate::buffer::{PacketLease, PacketPool, POOL_BUFS};
use crate::workers::WorkerPool;

/// Default packet capacity in bytes, one megabyte per hop.
pub const DEFAULT_PACKET_BYTES: usize = 1 << 20;

/// Per-caller scheduling state: packet sizing, the reusable buffer set and
/// an optional worker pool for the local merge.
///
/// One context serves one collective call at a time; callers wanting
/// concurrent collectives construct one context each.
pub struct ReduceContext {
    packet_bytes: usize,
    pool: PacketPool,
    workers: Option<WorkerPool>,
    logging: bool,
}

impl Default for ReduceContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ReduceContext {
    pub fn new() -> Self {
        Self {
            packet_bytes: DEFAULT_PACKET_BYTES,
            pool: PacketPool::default(),
            workers: None,
            logging: false,
        }
    }

    pub fn with_packet_bytes(mut self, bytes: usize) -> Self {
        self.packet_bytes = bytes;
        self
    }

    /// Attach a persistent worker pool for the local elementwise add.
    pub fn with_workers(mut self, nthreads: usize) -> Self {
        self.workers = Some(WorkerPool::new(nthreads));
        self
    }

    pub fn with_logging(mut self, on: bool) -> Self {
        self.logging = on;
        self
    }

    /// Allocate the shared buffer set up front so later calls skip the
    /// call-local fallback.
    pub fn preallocate(&mut self, nbufs: usize) {
        let cap = self.max_packet();
        self.pool.preallocate(cap, nbufs.min(POOL_BUFS));
    }

    /// Largest element count per packet; at least 1 even when the packet
    /// byte budget is smaller than one element.
    pub fn max_packet(&self) -> usize {
        (self.packet_bytes / std::mem::size_of::<f64>()).max(1)
    }

    pub fn logging(&self) -> bool {
        self.logging
    }

    pub(crate) fn acquire(&mut self, nbufs: usize) -> PacketLease {
        let cap = self.max_packet();
        self.pool.acquire(cap, nbufs)
    }

    pub(crate) fn release(&mut self, lease: PacketLease) {
        self.pool.release(lease);
    }

    /// Local `dst += src`, fanned out over the worker pool when one is
    /// attached.
    pub(crate) fn local_add(&self, dst: &mut [f64], src: &[f64]) {
        match &self.workers {
            Some(pool) => pool.add_assign(dst, src),
            None => crate::workers::add_assign(dst, src),
        }
    }
}
