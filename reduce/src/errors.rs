use communicator::CommError;
use thiserror::Error;

use crate::ReduceOp;

#[derive(Debug, Error)]
pub enum ReduceError {
    #[error("unsupported reduction operator {0:?}, only Sum is implemented")]
    UnsupportedOp(ReduceOp),

    #[error("root rank {root} outside communicator of size {size}")]
    RootOutOfRange { root: usize, size: usize },

    #[error("send buffer holds {send} elements but the root receive buffer holds {recv}")]
    LengthMismatch { send: usize, recv: usize },

    #[error("transport failure: {0}")]
    Transport(#[from] CommError),
}
