use thiserror::Error;

/// Transport failures are fatal: they propagate up and are never retried.
#[derive(Debug, Error)]
pub enum CommError {
    #[error("peer rank {0} disconnected")]
    Disconnected(usize),

    #[error("incoming message of {got} elements exceeds receive capacity {cap}")]
    Truncated { got: usize, cap: usize },

    #[error("transport backend failure: {0}")]
    Backend(String),
}

/// Point-to-point messaging between the ranks of one communicator.
///
/// Correctness of the chain schedulers only needs in-order delivery between
/// any pair of directly connected ranks. Receives may complete short:
/// `recv` returns the element count actually delivered, which the
/// compressed pipelines rely on.
///
/// Non-blocking operations take buffer ownership and hand it back on wait,
/// so a request can never observe its backing storage being reused.
pub trait Transport {
    type SendRequest;
    type RecvRequest;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Blocking send of `buf` to `to`.
    fn send(&self, buf: &[f64], to: usize) -> Result<(), CommError>;

    /// Blocking receive from `from` into `buf`; returns the element count.
    fn recv(&self, buf: &mut [f64], from: usize) -> Result<usize, CommError>;

    /// Combined send+receive, deadlock-free when both peers pair up their
    /// transfers; returns the received element count.
    fn send_recv(&self, sbuf: &[f64], to: usize, rbuf: &mut [f64], from: usize) -> Result<usize, CommError>;

    /// Start sending `buf[..len]` to `to`; the buffer comes back on
    /// [`Transport::wait_send`].
    fn isend(&self, buf: Vec<f64>, len: usize, to: usize) -> Result<Self::SendRequest, CommError>;

    /// Start receiving from `from` into `buf`; buffer and element count come
    /// back on [`Transport::wait_recv`].
    fn irecv(&self, buf: Vec<f64>, from: usize) -> Result<Self::RecvRequest, CommError>;

    fn wait_send(&self, req: Self::SendRequest) -> Result<Vec<f64>, CommError>;

    fn wait_recv(&self, req: Self::RecvRequest) -> Result<(Vec<f64>, usize), CommError>;
}
