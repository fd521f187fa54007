//! Pipelined sum reduction to a single root over a chain of ranks.
//!
//! The ranks form one open chain ending at the root; data flows from the
//! head through every relay, each adding its own operand, until the summed
//! vector lands in the root's receive buffer. The vector is cut into
//! packets so a relay can forward one packet while working on the next,
//! and the compressed variants keep sparse packets in run-length encoded
//! form on the wire.
//!
//! ```no_run
//! use communicator::local_world;
//! use zreduce::{reduce, Algorithm, ReduceContext, ReduceOp};
//!
//! let comms = local_world(4);
//! for comm in comms {
//!     std::thread::spawn(move || {
//!         let mut ctx = ReduceContext::new();
//!         let input = vec![0.0; 1 << 16];
//!         let mut output = vec![0.0; 1 << 16];
//!         reduce(&mut ctx, &comm, &input, &mut output, ReduceOp::Sum, 0,
//!                Algorithm::StreamRle).unwrap();
//!     });
//! }
//! ```

mod buffer;
mod chain;
mod context;
mod errors;
mod pipe;
mod stats;
mod workers;

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use communicator::Transport;

pub use buffer::AlignedBuf;
pub use context::{ReduceContext, DEFAULT_PACKET_BYTES};
pub use errors::ReduceError;
pub use stats::{PhaseTimes, ReduceStats};

use pipe::StreamMode;

/// Reduction operator requested by the caller. Only [`ReduceOp::Sum`] is
/// implemented; the rest exist so callers can express intent and get a
/// clean error instead of silently wrong data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Prod,
    Min,
    Max,
}

/// Pipeline variant selecting how transfers, merges and (optionally) the
/// codec interleave along the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// Blocking send/receive, one packet in flight per hop.
    SendRecv,
    /// Double-buffered combined send+receive transfers.
    SendRecvOverlap,
    /// Like [`Algorithm::SendRecvOverlap`] with run-length encoded packets.
    SendRecvRle,
    /// Triple-buffered non-blocking transfers.
    IsendIrecv,
    /// Streaming relay with decoupled send and receive progress.
    Stream,
    /// Streaming relay over one compressed stream per hop.
    StreamRle,
    /// Streaming relay with per-packet compression, a dense first hop and
    /// dense fallback for incompressible packets.
    StreamRlePacket,
}

impl Algorithm {
    /// Every variant, in the order benchmarks report them.
    pub const ALL: [Algorithm; 7] = [
        Algorithm::SendRecv,
        Algorithm::SendRecvOverlap,
        Algorithm::SendRecvRle,
        Algorithm::IsendIrecv,
        Algorithm::Stream,
        Algorithm::StreamRle,
        Algorithm::StreamRlePacket,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::SendRecv => "send-recv",
            Algorithm::SendRecvOverlap => "sendrecv",
            Algorithm::SendRecvRle => "sendrecv-rle",
            Algorithm::IsendIrecv => "isend-irecv",
            Algorithm::Stream => "stream",
            Algorithm::StreamRle => "stream-rle",
            Algorithm::StreamRlePacket => "stream-rle-packet",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Algorithm::ALL
            .into_iter()
            .find(|a| a.name() == s)
            .ok_or_else(|| format!("unknown algorithm {s:?}"))
    }
}

/// A relay forwards a packet dense when the encoded size reaches this
/// fraction of the dense span. An encoding is never longer than its dense
/// span, so `1.0` never falls back; lower it to skip re-packing packets
/// that compress poorly.
const PACKET_FALLBACK_THRESHOLD: f64 = 1.0;

/// Reduce `sendbuf` elementwise across all ranks of `comm` into the root's
/// `recvbuf`.
///
/// Every rank passes the same `count`, `op`, `root` and `algorithm`;
/// `recvbuf` is only read on the root, where it must match `sendbuf` in
/// length. Returns what this rank measured during the call.
pub fn reduce<T: Transport>(
    ctx: &mut ReduceContext,
    comm: &T,
    sendbuf: &[f64],
    recvbuf: &mut [f64],
    op: ReduceOp,
    root: usize,
    algorithm: Algorithm,
) -> Result<ReduceStats, ReduceError> {
    if op != ReduceOp::Sum {
        return Err(ReduceError::UnsupportedOp(op));
    }
    if root >= comm.size() {
        return Err(ReduceError::RootOutOfRange { root, size: comm.size() });
    }
    let is_root = comm.rank() == root;
    if is_root && recvbuf.len() != sendbuf.len() {
        return Err(ReduceError::LengthMismatch { send: sendbuf.len(), recv: recvbuf.len() });
    }

    let mut stats = ReduceStats::new(sendbuf.len());
    let start = Instant::now();

    if comm.size() == 1 {
        recvbuf.copy_from_slice(sendbuf);
        stats.times.total = start.elapsed().as_secs_f64();
        return Ok(stats);
    }

    let pipeline_start = Instant::now();
    match algorithm {
        Algorithm::SendRecv => pipe::reduce_send_recv(ctx, comm, sendbuf, recvbuf, root, &mut stats)?,
        Algorithm::SendRecvOverlap => {
            pipe::reduce_sendrecv(ctx, comm, sendbuf, recvbuf, root, false, &mut stats)?
        }
        Algorithm::SendRecvRle => {
            pipe::reduce_sendrecv(ctx, comm, sendbuf, recvbuf, root, true, &mut stats)?
        }
        Algorithm::IsendIrecv => pipe::reduce_isend_irecv(ctx, comm, sendbuf, recvbuf, root, &mut stats)?,
        Algorithm::Stream => {
            pipe::reduce_stream(ctx, comm, sendbuf, recvbuf, root, StreamMode::Plain, &mut stats)?
        }
        Algorithm::StreamRle => {
            pipe::reduce_stream(ctx, comm, sendbuf, recvbuf, root, StreamMode::Rle, &mut stats)?
        }
        Algorithm::StreamRlePacket => {
            let mode = StreamMode::RlePacket {
                first_hop_dense: true,
                fallback_threshold: PACKET_FALLBACK_THRESHOLD,
            };
            pipe::reduce_stream(ctx, comm, sendbuf, recvbuf, root, mode, &mut stats)?
        }
    }
    stats.times.pipeline = pipeline_start.elapsed().as_secs_f64();
    stats.times.total = start.elapsed().as_secs_f64();

    if ctx.logging() {
        stats.log(comm.rank(), algorithm.name());
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_names_round_trip() {
        for alg in Algorithm::ALL {
            assert_eq!(alg.name().parse::<Algorithm>().unwrap(), alg);
        }
        assert!("bogus".parse::<Algorithm>().is_err());
    }
}
