//! Chain topology and packetization.
//!
//! The ranks form one open chain ending at the root. The head is
//! `(root - 1 + size) % size`; from there each rank forwards to
//! `(rank - 1 + size) % size` until the data reaches `root`. A rank's
//! upstream neighbor is `(rank + 1) % size`.

/// Where this rank sits in the chain, computed once per collective call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chain {
    pub rank: usize,
    pub size: usize,
    pub root: usize,
    /// Upstream neighbor we receive from; `None` at the head.
    pub upstream: Option<usize>,
    /// Downstream neighbor we forward to; `None` at the root.
    pub downstream: Option<usize>,
}

impl Chain {
    pub fn new(root: usize, rank: usize, size: usize) -> Self {
        let head = (root + size - 1) % size;
        let upstream = if rank == head { None } else { Some((rank + 1) % size) };
        let downstream = if rank == root { None } else { Some((rank + size - 1) % size) };
        Self { rank, size, root, upstream, downstream }
    }

    /// Head of the chain: sends only.
    #[inline]
    pub fn is_head(&self) -> bool {
        self.upstream.is_none()
    }

    /// End of the chain: holds the final result.
    #[inline]
    pub fn is_root(&self) -> bool {
        self.downstream.is_none()
    }

    /// The rank right after the head, relevant when the first hop travels
    /// uncompressed.
    #[inline]
    pub fn is_second(&self) -> bool {
        self.size >= 2 && self.rank == (self.root + self.size - 2) % self.size
    }
}

/// Tiles `count` elements into a fixed number of packets, none larger than
/// the buffer capacity: each step hands out `ceil(remaining / packets_left)`
/// elements, so the sizes sum exactly to `count` and never increase.
#[derive(Debug, Clone)]
pub struct Packets {
    remaining: usize,
    npackets: usize,
}

impl Packets {
    pub fn new(count: usize, max_packet: usize) -> Self {
        debug_assert!(max_packet > 0);
        Self { remaining: count, npackets: count.div_ceil(max_packet) }
    }
}

impl Iterator for Packets {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.npackets == 0 {
            return None;
        }
        let size = self.remaining.div_ceil(self.npackets);
        self.npackets -= 1;
        self.remaining -= size;
        Some(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_ends_at_root() {
        // 3 ranks, root 0: head is 2, then 1, then 0
        let c2 = Chain::new(0, 2, 3);
        let c1 = Chain::new(0, 1, 3);
        let c0 = Chain::new(0, 0, 3);

        assert!(c2.is_head());
        assert_eq!(c2.downstream, Some(1));
        assert_eq!(c1.upstream, Some(2));
        assert_eq!(c1.downstream, Some(0));
        assert!(c1.is_second());
        assert!(c0.is_root());
        assert_eq!(c0.upstream, Some(1));
    }

    #[test]
    fn chain_handles_nonzero_root() {
        let size = 8;
        let root = 5;
        let mut rank = (root + size - 1) % size;
        let mut visited = vec![Chain::new(root, rank, size)];
        while let Some(next) = visited.last().unwrap().downstream {
            rank = next;
            visited.push(Chain::new(root, rank, size));
        }
        assert_eq!(visited.len(), size);
        assert!(visited.first().unwrap().is_head());
        assert_eq!(visited.last().unwrap().rank, root);
        for pair in visited.windows(2) {
            assert_eq!(pair[1].upstream, Some(pair[0].rank));
        }
    }

    #[test]
    fn packets_tile_exactly_and_never_grow() {
        for count in [0usize, 1, 2, 7, 100, 1023, 100_000] {
            for max_packet in [1usize, 3, 64, 1000, 1 << 17] {
                let sizes: Vec<usize> = Packets::new(count, max_packet).collect();
                assert_eq!(sizes.iter().sum::<usize>(), count, "count={count} max={max_packet}");
                assert!(sizes.iter().all(|&s| s > 0 && s <= max_packet));
                assert!(sizes.windows(2).all(|w| w[0] >= w[1]), "sizes must be non-increasing: {sizes:?}");
            }
        }
    }

    #[test]
    fn zero_count_yields_no_packets() {
        assert_eq!(Packets::new(0, 128).count(), 0);
    }
}
