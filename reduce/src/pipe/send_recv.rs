//! Fully blocking baseline: one packet in flight per hop.

use communicator::Transport;

use crate::chain::{Chain, Packets};
use crate::context::ReduceContext;
use crate::errors::ReduceError;
use crate::stats::{timed, ReduceStats};

/// Each relay receives a packet, adds its own contribution and forwards it
/// before touching the next packet. No overlap anywhere; every other
/// variant is measured against this one.
pub(crate) fn reduce_send_recv<T: Transport>(
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
        let mut done = 0;
        for packet in Packets::new(count, max_packet) {
            let n = timed(&mut stats.times.recv, || comm.recv(&mut recvbuf[done..done + packet], up))?;
            stats.slots_received += n;
            timed(&mut stats.times.merge, || {
                ctx.local_add(&mut recvbuf[done..done + packet], &sendbuf[done..done + packet])
            });
            done += packet;
        }
        return Ok(());
    }

    let down = chain.downstream.unwrap();
    let mut lease = ctx.acquire(1);
    let result = (|| -> Result<(), ReduceError> {
        let buf = &mut lease.bufs[0];
        let mut done = 0;
        for packet in Packets::new(count, max_packet) {
            let n = timed(&mut stats.times.recv, || comm.recv(&mut buf[..packet], up))?;
            stats.slots_received += n;
            timed(&mut stats.times.merge, || {
                ctx.local_add(&mut buf[..packet], &sendbuf[done..done + packet])
            });
            timed(&mut stats.times.send, || comm.send(&buf[..packet], down))?;
            stats.slots_sent += packet;
            done += packet;
        }
        Ok(())
    })();
    ctx.release(lease);
    result
}
