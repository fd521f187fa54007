//! Streaming pipelines: sends and receives progress independently.
//!
//! Unlike the packet-lockstep variants, a streaming relay tracks how many
//! dense elements it has taken in (`recvs`) and passed on (`sends`)
//! separately and keeps going until both reach the vector length. That
//! decoupling is what lets the compressed modes reshape the stream: a relay
//! may consume one large incoming chunk over several outgoing ones, or fold
//! several incoming chunks into a single one.

use communicator::Transport;
use rlev::{compress, compress_bounded, merge_add_in_place, merge_add_stream, InPlaceMode, RunCarry};

use crate::chain::Chain;
use crate::context::ReduceContext;
use crate::errors::ReduceError;
use crate::stats::{timed, ReduceStats};

/// How a streaming pipeline treats the payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum StreamMode {
    /// Dense elements end to end.
    Plain,
    /// One compressed stream per hop; chunk boundaries fall wherever the
    /// outgoing buffer fills, with run state carried across them.
    Rle,
    /// Compression applied per packet, keeping hops in lockstep sizes.
    RlePacket {
        /// The head ships dense and the second rank compresses while
        /// merging, trading first-hop bandwidth for one less codec pass.
        first_hop_dense: bool,
        /// A relay forwards a packet dense again when the encoded size is
        /// at least this fraction of the dense span. `1.0` never falls
        /// back.
        fallback_threshold: f64,
    },
}

pub(crate) fn reduce_stream<T: Transport>(
    ctx: &mut ReduceContext,
    comm: &T,
    sendbuf: &[f64],
    recvbuf: &mut [f64],
    root: usize,
    mode: StreamMode,
    stats: &mut ReduceStats,
) -> Result<(), ReduceError> {
    let chain = Chain::new(root, comm.rank(), comm.size());
    let max_packet = ctx.max_packet();

    if chain.is_head() {
        let mut lease = ctx.acquire(1);
        let result = head(comm, &chain, sendbuf, max_packet, mode, &mut lease.bufs[0], stats);
        ctx.release(lease);
        return result;
    }

    if chain.is_root() {
        let mut lease = ctx.acquire(1);
        let result = root_end(ctx, comm, &chain, sendbuf, recvbuf, max_packet, mode, &mut lease.bufs[0], stats);
        ctx.release(lease);
        return result;
    }

    let mut lease = ctx.acquire(2);
    let result = {
        let (a, b) = lease.bufs.split_at_mut(1);
        match mode {
            StreamMode::Plain => {
                relay_plain(ctx, comm, &chain, sendbuf, max_packet, &mut a[0], &mut b[0], stats)
            }
            StreamMode::Rle => {
                relay_rle(comm, &chain, sendbuf, max_packet, &mut a[0], &mut b[0], stats)
            }
            StreamMode::RlePacket { first_hop_dense, fallback_threshold } => relay_packet(
                comm,
                &chain,
                sendbuf,
                max_packet,
                first_hop_dense,
                fallback_threshold,
                &mut a[0],
                &mut b[0],
                stats,
            ),
        }
    };
    ctx.release(lease);
    result
}

fn head<T: Transport>(
    comm: &T,
    chain: &Chain,
    sendbuf: &[f64],
    max_packet: usize,
    mode: StreamMode,
    buf: &mut Vec<f64>,
    stats: &mut ReduceStats,
) -> Result<(), ReduceError> {
    let down = chain.downstream.unwrap();
    let count = sendbuf.len();
    let mut off = 0;
    while off < count {
        match mode {
            StreamMode::Rle => {
                // Take as much input as fits the outgoing buffer once
                // encoded; zero runs are consumed whole.
                let (consumed, written) = timed(&mut stats.times.merge, || {
                    compress_bounded(&sendbuf[off..], &mut buf[..max_packet])
                });
                timed(&mut stats.times.send, || comm.send(&buf[..written], down))?;
                stats.slots_sent += written;
                off += consumed;
            }
            StreamMode::RlePacket { first_hop_dense: false, .. } => {
                let span = (count - off).min(max_packet);
                let written = timed(&mut stats.times.merge, || {
                    compress(&sendbuf[off..off + span], &mut buf[..span])
                });
                timed(&mut stats.times.send, || comm.send(&buf[..written], down))?;
                stats.slots_sent += written;
                off += span;
            }
            StreamMode::Plain | StreamMode::RlePacket { first_hop_dense: true, .. } => {
                let span = (count - off).min(max_packet);
                timed(&mut stats.times.send, || comm.send(&sendbuf[off..off + span], down))?;
                stats.slots_sent += span;
                off += span;
            }
        }
    }
    Ok(())
}

fn root_end<T: Transport>(
    ctx: &ReduceContext,
    comm: &T,
    chain: &Chain,
    sendbuf: &[f64],
    recvbuf: &mut [f64],
    max_packet: usize,
    mode: StreamMode,
    scratch: &mut Vec<f64>,
    stats: &mut ReduceStats,
) -> Result<(), ReduceError> {
    let up = chain.upstream.unwrap();
    let count = sendbuf.len();
    let mut off = 0;
    let mut carry = RunCarry::new();
    while off < count {
        match mode {
            StreamMode::Plain => {
                let cap = (count - off).min(max_packet);
                let n = timed(&mut stats.times.recv, || comm.recv(&mut recvbuf[off..off + cap], up))?;
                stats.slots_received += n;
                timed(&mut stats.times.merge, || {
                    ctx.local_add(&mut recvbuf[off..off + n], &sendbuf[off..off + n])
                });
                off += n;
            }
            StreamMode::Rle => {
                let n = timed(&mut stats.times.recv, || comm.recv(&mut scratch[..max_packet], up))?;
                stats.slots_received += n;
                // The result buffer has room for the full expansion, so the
                // chunk and any carried run drain completely here.
                let r = timed(&mut stats.times.merge, || {
                    merge_add_stream(false, &scratch[..n], &sendbuf[off..], &mut recvbuf[off..], &mut carry)
                });
                debug_assert_eq!(r.consumed0, n);
                debug_assert_eq!(r.consumed1, r.written);
                off += r.consumed1;
            }
            StreamMode::RlePacket { .. } => {
                let span = (count - off).min(max_packet);
                let n = timed(&mut stats.times.recv, || comm.recv(&mut scratch[..span], up))?;
                stats.slots_received += n;
                // Seed the result span with our own operand, then fold the
                // encoded arrival into it in place.
                timed(&mut stats.times.merge, || {
                    recvbuf[off..off + span].copy_from_slice(&sendbuf[off..off + span]);
                    merge_add_in_place(
                        InPlaceMode::DenseUnpackTail,
                        &mut recvbuf[off..off + span],
                        span,
                        &scratch[..n],
                        span,
                    );
                });
                off += span;
            }
        }
    }
    debug_assert!(carry.is_empty());
    Ok(())
}

fn relay_plain<T: Transport>(
    ctx: &ReduceContext,
    comm: &T,
    chain: &Chain,
    sendbuf: &[f64],
    max_packet: usize,
    out: &mut Vec<f64>,
    inbuf: &mut Vec<f64>,
    stats: &mut ReduceStats,
) -> Result<(), ReduceError> {
    let up = chain.upstream.unwrap();
    let down = chain.downstream.unwrap();
    let count = sendbuf.len();
    let (mut out, mut inbuf) = (out, inbuf);
    let mut pending = 0;
    let mut off = 0;
    let mut sends = 0;
    let mut recvs = 0;
    while sends < count || recvs < count {
        let mut received = 0;
        if recvs < count {
            received = if pending == 0 {
                timed(&mut stats.times.recv, || comm.recv(&mut inbuf[..max_packet], up))?
            } else {
                let n = timed(&mut stats.times.sendrecv, || {
                    comm.send_recv(&out[..pending], down, &mut inbuf[..max_packet], up)
                })?;
                stats.slots_sent += pending;
                sends += pending;
                pending = 0;
                n
            };
            stats.slots_received += received;
            recvs += received;
        } else if pending > 0 {
            timed(&mut stats.times.send, || comm.send(&out[..pending], down))?;
            stats.slots_sent += pending;
            sends += pending;
            pending = 0;
        }
        if received > 0 {
            timed(&mut stats.times.merge, || {
                ctx.local_add(&mut inbuf[..received], &sendbuf[off..off + received])
            });
            off += received;
            pending = received;
            std::mem::swap(&mut out, &mut inbuf);
        }
    }
    Ok(())
}

/// Relay for the whole-stream compressed mode. Incoming chunks are merged
/// with the local operand straight into outgoing compressed chunks of at
/// most `max_packet` slots; a run interrupted by the outgoing capacity is
/// carried into the next merge call.
fn relay_rle<T: Transport>(
    comm: &T,
    chain: &Chain,
    sendbuf: &[f64],
    max_packet: usize,
    out: &mut Vec<f64>,
    enc: &mut Vec<f64>,
    stats: &mut ReduceStats,
) -> Result<(), ReduceError> {
    let up = chain.upstream.unwrap();
    let down = chain.downstream.unwrap();
    let count = sendbuf.len();
    let mut carry = RunCarry::new();
    // Unconsumed window of the incoming chunk.
    let mut enc_off = 0;
    let mut enc_len = 0;
    // Outgoing chunk and the dense span it covers.
    let mut pending = 0;
    let mut pending_span = 0;
    let mut off = 0;
    let mut sends = 0;
    let mut recvs = 0;
    while sends < count || recvs < count {
        // A parked run can keep producing output without new input, so only
        // block on upstream once both the chunk window and the carry are
        // exhausted; the final chunk of a sparse stream may expand across
        // many outgoing ones.
        if enc_off == enc_len && carry.is_empty() && recvs < count {
            let n = if pending == 0 {
                timed(&mut stats.times.recv, || comm.recv(&mut enc[..max_packet], up))?
            } else {
                let n = timed(&mut stats.times.sendrecv, || {
                    comm.send_recv(&out[..pending], down, &mut enc[..max_packet], up)
                })?;
                stats.slots_sent += pending;
                sends += pending_span;
                pending = 0;
                pending_span = 0;
                n
            };
            stats.slots_received += n;
            enc_off = 0;
            enc_len = n;
        } else if pending > 0 {
            timed(&mut stats.times.send, || comm.send(&out[..pending], down))?;
            stats.slots_sent += pending;
            sends += pending_span;
            pending = 0;
            pending_span = 0;
        }
        let r = timed(&mut stats.times.merge, || {
            merge_add_stream(
                true,
                &enc[enc_off..enc_len],
                &sendbuf[off..],
                &mut out[..max_packet],
                &mut carry,
            )
        });
        enc_off += r.consumed0;
        off += r.consumed1;
        recvs += r.consumed1;
        pending = r.written;
        pending_span = r.consumed1;
    }
    debug_assert!(carry.is_empty());
    Ok(())
}

/// Relay for the per-packet compressed mode. Packets stay aligned to the
/// dense tiling, so a hop can decide per packet whether to re-pack, pass a
/// poorly compressing packet dense, or (right after a dense first hop)
/// compress while merging.
#[allow(clippy::too_many_arguments)]
fn relay_packet<T: Transport>(
    comm: &T,
    chain: &Chain,
    sendbuf: &[f64],
    max_packet: usize,
    first_hop_dense: bool,
    fallback_threshold: f64,
    bufa: &mut Vec<f64>,
    bufb: &mut Vec<f64>,
    stats: &mut ReduceStats,
) -> Result<(), ReduceError> {
    let up = chain.upstream.unwrap();
    let down = chain.downstream.unwrap();
    let count = sendbuf.len();
    let (mut cur, mut prev) = (bufa, bufb);
    let mut pending = 0;
    let mut pending_start = 0;
    let mut pending_span = 0;
    let mut off = 0;
    let mut sends = 0;
    let mut recvs = 0;
    while sends < count || recvs < count {
        if recvs < count {
            let span = (count - recvs).min(max_packet);
            let n = if pending == 0 {
                timed(&mut stats.times.recv, || comm.recv(&mut cur[..span], up))?
            } else {
                let n = timed(&mut stats.times.sendrecv, || {
                    comm.send_recv(
                        &prev[pending_start..pending_start + pending],
                        down,
                        &mut cur[..span],
                        up,
                    )
                })?;
                stats.slots_sent += pending;
                sends += pending_span;
                n
            };
            stats.slots_received += n;
            let tail = timed(&mut stats.times.merge, || {
                if first_hop_dense && chain.is_second() {
                    merge_add_in_place(InPlaceMode::PackForward, cur, n, &sendbuf[off..off + span], span)
                } else if (span as f64) * fallback_threshold < n as f64 {
                    merge_add_in_place(InPlaceMode::UnpackTail, cur, n, &sendbuf[off..off + span], span)
                } else {
                    merge_add_in_place(InPlaceMode::PackTail, cur, n, &sendbuf[off..off + span], span)
                }
            });
            pending_start = tail.start;
            pending = tail.len;
            pending_span = span;
            off += span;
            recvs += span;
            std::mem::swap(&mut cur, &mut prev);
        } else if pending > 0 {
            timed(&mut stats.times.send, || {
                comm.send(&prev[pending_start..pending_start + pending], down)
            })?;
            stats.slots_sent += pending;
            sends += pending_span;
            pending = 0;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use communicator::local_world;

    fn run_mode(mode: StreamMode, inputs: Vec<Vec<f64>>, packet_bytes: usize) -> Vec<f64> {
        let count = inputs[0].len();
        let world = local_world(inputs.len());
        let handles: Vec<_> = world
            .into_iter()
            .zip(inputs)
            .map(|(comm, input)| {
                std::thread::spawn(move || {
                    let mut ctx = ReduceContext::new().with_packet_bytes(packet_bytes);
                    let mut recvbuf = vec![0.0; if comm.rank() == 0 { count } else { 0 }];
                    let mut stats = ReduceStats::new(count);
                    reduce_stream(&mut ctx, &comm, &input, &mut recvbuf, 0, mode, &mut stats).unwrap();
                    recvbuf
                })
            })
            .collect();
        let mut out = Vec::new();
        for handle in handles {
            let buf = handle.join().unwrap();
            if !buf.is_empty() {
                out = buf;
            }
        }
        out
    }

    fn sparse_inputs(ranks: usize, count: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
        let inputs: Vec<Vec<f64>> = (0..ranks)
            .map(|r| {
                (0..count)
                    .map(|i| if (i + r) % 7 == 0 { (i + r) as f64 } else { 0.0 })
                    .collect()
            })
            .collect();
        let mut expected = vec![0.0; count];
        for input in &inputs {
            for (e, v) in expected.iter_mut().zip(input) {
                *e += v;
            }
        }
        (inputs, expected)
    }

    #[test]
    fn packet_mode_with_compressed_first_hop() {
        let (inputs, expected) = sparse_inputs(4, 500);
        let mode = StreamMode::RlePacket { first_hop_dense: false, fallback_threshold: 1.0 };
        assert_eq!(run_mode(mode, inputs, 64 * 8), expected);
    }

    #[test]
    fn packet_mode_fallback_threshold_forwards_dense() {
        // Dense inputs compress to full length, so any threshold below one
        // pushes every relay onto the dense path; the result must not
        // change.
        let inputs: Vec<Vec<f64>> = (0..3).map(|r| (0..200).map(|i| (i * r + 1) as f64).collect()).collect();
        let mut expected = vec![0.0; 200];
        for input in &inputs {
            for (e, v) in expected.iter_mut().zip(input) {
                *e += v;
            }
        }
        let mode = StreamMode::RlePacket { first_hop_dense: false, fallback_threshold: 0.5 };
        assert_eq!(run_mode(mode, inputs, 32 * 8), expected);
    }

    #[test]
    fn rle_mode_drains_parked_run_after_final_chunk() {
        // The head's all-zero operand collapses into a single run marker,
        // arriving at the relay as its one and only chunk. Against a dense
        // relay operand and 4-element outgoing chunks the run is parked and
        // must keep draining without any further upstream input.
        let count = 100;
        let inputs = vec![
            (0..count).map(|i| i as f64).collect::<Vec<f64>>(),
            vec![1.0; count],
            vec![0.0; count],
        ];
        let expected: Vec<f64> = (0..count).map(|i| i as f64 + 1.0).collect();
        assert_eq!(run_mode(StreamMode::Rle, inputs, 4 * 8), expected);
    }

    #[test]
    fn rle_mode_reshapes_chunks_across_hops() {
        // Tiny packets force runs to split across outgoing chunks on every
        // relay.
        let (inputs, expected) = sparse_inputs(5, 1000);
        assert_eq!(run_mode(StreamMode::Rle, inputs, 4 * 8), expected);
    }
}
