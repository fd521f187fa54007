//! Triple-buffered pipeline on non-blocking transfers.
//!
//! A relay keeps three packets in flight: one being received, one being
//! merged, one being sent. The buffers rotate one position per iteration,
//! so the buffer just sent becomes the next receive target. The loop runs
//! two extra iterations past the last packet to drain the merge and send
//! stages.

use communicator::Transport;

use crate::chain::{Chain, Packets};
use crate::context::ReduceContext;
use crate::errors::ReduceError;
use crate::stats::{timed, ReduceStats};

pub(crate) fn reduce_isend_irecv<T: Transport>(
    ctx: &mut ReduceContext,
    comm: &T,
    sendbuf: &[f64],
    recvbuf: &mut [f64],
    root: usize,
    stats: &mut ReduceStats,
) -> Result<(), ReduceError> {
    let chain = Chain::new(root, comm.rank(), comm.size());
    let count = sendbuf.len();
    let max_packet = ctx.max_packet();

    if chain.is_head() {
        let down = chain.downstream.unwrap();
        let mut done = 0;
        for packet in Packets::new(count, max_packet) {
            timed(&mut stats.times.send, || comm.send(&sendbuf[done..done + packet], down))?;
            stats.slots_sent += packet;
            done += packet;
        }
        return Ok(());
    }

    let up = chain.upstream.unwrap();

    if chain.is_root() {
        // The root only overlaps the merge of the previous packet with the
        // arrival of the current one; receiving straight into the result
        // buffer keeps it copy-free.
        let mut packets = Packets::new(count, max_packet);
        let mut done = 0;
        let mut prev = 0;
        loop {
            let current = packets.next().unwrap_or(0);
            if current == 0 && prev == 0 {
                break;
            }
            if prev > 0 {
                timed(&mut stats.times.merge, || {
                    ctx.local_add(&mut recvbuf[done - prev..done], &sendbuf[done - prev..done])
                });
            }
            if current > 0 {
                let n = timed(&mut stats.times.recv, || {
                    comm.recv(&mut recvbuf[done..done + current], up)
                })?;
                stats.slots_received += n;
            }
            done += current;
            prev = current;
        }
        return Ok(());
    }

    let down = chain.downstream.unwrap();
    let mut lease = ctx.acquire(3);
    let result = (|| -> Result<(), ReduceError> {
        // bufs[0] receives, bufs[1] merges, bufs[2] sends.
        let mut bufs = [
            std::mem::take(&mut lease.bufs[0]),
            std::mem::take(&mut lease.bufs[1]),
            std::mem::take(&mut lease.bufs[2]),
        ];
        let mut packets = Packets::new(count, max_packet);
        let mut done = 0;
        let mut prev = 0;
        let mut pprev = 0;
        loop {
            let current = packets.next().unwrap_or(0);
            if current == 0 && prev == 0 && pprev == 0 {
                break;
            }
            let rreq = if current > 0 {
                Some(comm.irecv(std::mem::take(&mut bufs[0]), up)?)
            } else {
                None
            };
            let sreq = if pprev > 0 {
                Some(comm.isend(std::mem::take(&mut bufs[2]), pprev, down)?)
            } else {
                None
            };
            if prev > 0 {
                timed(&mut stats.times.merge, || {
                    ctx.local_add(&mut bufs[1][..prev], &sendbuf[done - prev..done])
                });
            }
            if let Some(req) = rreq {
                let (buf, n) = timed(&mut stats.times.recv, || comm.wait_recv(req))?;
                stats.slots_received += n;
                bufs[0] = buf;
            }
            if let Some(req) = sreq {
                bufs[2] = timed(&mut stats.times.send, || comm.wait_send(req))?;
                stats.slots_sent += pprev;
            }
            // sent buffer -> receive slot, received -> merge, merged -> send
            bufs.rotate_right(1);
            done += current;
            pprev = prev;
            prev = current;
        }
        let [a, b, c] = bufs;
        lease.bufs[0] = a;
        lease.bufs[1] = b;
        lease.bufs[2] = c;
        Ok(())
    })();
    ctx.release(lease);
    result
}
