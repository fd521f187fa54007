//! Double-buffered pipeline built on combined send+receive transfers.
//!
//! A relay holds two packet buffers: while the packet merged last iteration
//! travels downstream, the next one arrives from upstream in the same
//! combined transfer. The final packet needs one trailing send once the
//! receive loop runs dry.
//!
//! With `rle` set the head compresses before the first hop, relays merge
//! encoded-in-place (the result packs toward the buffer tail) and the root
//! expands while merging, so sparse vectors never travel dense.

use communicator::Transport;
use rlev::{compress, merge_add_in_place, InPlaceMode};

use crate::chain::{Chain, Packets};
use crate::context::ReduceContext;
use crate::errors::ReduceError;
use crate::stats::{timed, ReduceStats};

pub(crate) fn reduce_sendrecv<T: Transport>(
    ctx: &mut ReduceContext,
    comm: &T,
    sendbuf: &[f64],
    recvbuf: &mut [f64],
    root: usize,
    rle: bool,
    stats: &mut ReduceStats,
) -> Result<(), ReduceError> {
    let chain = Chain::new(root, comm.rank(), comm.size());
    let count = sendbuf.len();
    let max_packet = ctx.max_packet();

    if chain.is_head() {
        let down = chain.downstream.unwrap();
        if !rle {
            let mut done = 0;
            for packet in Packets::new(count, max_packet) {
                timed(&mut stats.times.send, || comm.send(&sendbuf[done..done + packet], down))?;
                stats.slots_sent += packet;
                done += packet;
            }
            return Ok(());
        }
        let mut lease = ctx.acquire(1);
        let result = (|| -> Result<(), ReduceError> {
            let buf = &mut lease.bufs[0];
            let mut done = 0;
            for packet in Packets::new(count, max_packet) {
                let written = timed(&mut stats.times.merge, || {
                    compress(&sendbuf[done..done + packet], &mut buf[..packet])
                });
                timed(&mut stats.times.send, || comm.send(&buf[..written], down))?;
                stats.slots_sent += written;
                done += packet;
            }
            Ok(())
        })();
        ctx.release(lease);
        return result;
    }

    let up = chain.upstream.unwrap();

    if chain.is_root() {
        let mut done = 0;
        for packet in Packets::new(count, max_packet) {
            let n = timed(&mut stats.times.recv, || comm.recv(&mut recvbuf[done..done + packet], up))?;
            stats.slots_received += n;
            timed(&mut stats.times.merge, || {
                if rle {
                    merge_add_in_place(
                        InPlaceMode::UnpackTail,
                        &mut recvbuf[done..done + packet],
                        n,
                        &sendbuf[done..done + packet],
                        packet,
                    );
                } else {
                    ctx.local_add(&mut recvbuf[done..done + packet], &sendbuf[done..done + packet]);
                }
            });
            done += packet;
        }
        return Ok(());
    }

    // Relay: merge into the freshly received buffer, then ship it in the
    // same transfer that brings the next packet in.
    let down = chain.downstream.unwrap();
    let mut lease = ctx.acquire(2);
    let result = (|| -> Result<(), ReduceError> {
        let (a, b) = lease.bufs.split_at_mut(1);
        let mut cur = &mut a[0];
        let mut prev = &mut b[0];
        let mut pending_start = 0;
        let mut pending = 0;
        let mut done = 0;
        for packet in Packets::new(count, max_packet) {
            let n = if pending == 0 {
                timed(&mut stats.times.recv, || comm.recv(&mut cur[..packet], up))?
            } else {
                let n = timed(&mut stats.times.sendrecv, || {
                    comm.send_recv(&prev[pending_start..pending_start + pending], down, &mut cur[..packet], up)
                })?;
                stats.slots_sent += pending;
                n
            };
            stats.slots_received += n;
            timed(&mut stats.times.merge, || {
                if rle {
                    let tail = merge_add_in_place(
                        InPlaceMode::PackTail,
                        cur,
                        n,
                        &sendbuf[done..done + packet],
                        packet,
                    );
                    pending_start = tail.start;
                    pending = tail.len;
                } else {
                    ctx.local_add(&mut cur[..packet], &sendbuf[done..done + packet]);
                    pending_start = 0;
                    pending = packet;
                }
            });
            std::mem::swap(&mut cur, &mut prev);
            done += packet;
        }
        if pending > 0 {
            timed(&mut stats.times.send, || {
                comm.send(&prev[pending_start..pending_start + pending], down)
            })?;
            stats.slots_sent += pending;
        }
        Ok(())
    })();
    ctx.release(lease);
    result
}
