use mpi::datatype::Equivalence;
use mpi::environment::Universe;
use mpi::point_to_point as p2p;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;

use crate::{CommError, Transport};

/// MPI-backed transport over `MPI_COMM_WORLD`.
///
/// Immediate operations are serviced lazily: `isend`/`irecv` record the
/// transfer and the matching `wait_*` performs it with the blocking
/// primitive. The schedulers wait on receives before sends, which keeps the
/// chain free of rendezvous deadlocks at the cost of some overlap.
pub struct MpiComm {
    _universe: Universe,
    world: SimpleCommunicator,
}

pub struct MpiSendRequest {
    buf: Vec<f64>,
    len: usize,
    to: usize,
}

pub struct MpiRecvRequest {
    buf: Vec<f64>,
    from: usize,
}

impl MpiComm {
    pub fn new() -> Result<Self, CommError> {
        let universe = mpi::initialize().ok_or_else(|| CommError::Backend("MPI already initialized".into()))?;
        let world = universe.world();
        log::debug!("MPI world initialized: rank {} of {}", world.rank(), world.size());
        Ok(Self { _universe: universe, world })
    }

    fn count_of(status: &p2p::Status) -> usize {
        status.count(f64::equivalent_datatype()) as usize
    }
}

impl Transport for MpiComm {
    type SendRequest = MpiSendRequest;
    type RecvRequest = MpiRecvRequest;

    fn rank(&self) -> usize {
        self.world.rank() as usize
    }

    fn size(&self) -> usize {
        self.world.size() as usize
    }

    fn send(&self, buf: &[f64], to: usize) -> Result<(), CommError> {
        self.world.process_at_rank(to as i32).send(buf);
        Ok(())
    }

    fn recv(&self, buf: &mut [f64], from: usize) -> Result<usize, CommError> {
        let status = self.world.process_at_rank(from as i32).receive_into(buf);
        Ok(Self::count_of(&status))
    }

    fn send_recv(&self, sbuf: &[f64], to: usize, rbuf: &mut [f64], from: usize) -> Result<usize, CommError> {
        let status = p2p::send_receive_into(
            sbuf,
            &self.world.process_at_rank(to as i32),
            rbuf,
            &self.world.process_at_rank(from as i32),
        );
        Ok(Self::count_of(&status))
    }

    fn isend(&self, buf: Vec<f64>, len: usize, to: usize) -> Result<Self::SendRequest, CommError> {
        Ok(MpiSendRequest { buf, len, to })
    }

    fn irecv(&self, buf: Vec<f64>, from: usize) -> Result<Self::RecvRequest, CommError> {
        Ok(MpiRecvRequest { buf, from })
    }

    fn wait_send(&self, req: Self::SendRequest) -> Result<Vec<f64>, CommError> {
        self.send(&req.buf[..req.len], req.to)?;
        Ok(req.buf)
    }

    fn wait_recv(&self, req: Self::RecvRequest) -> Result<(Vec<f64>, usize), CommError> {
        let MpiRecvRequest { mut buf, from } = req;
        let n = self.recv(&mut buf, from)?;
        Ok((buf, n))
    }
}
