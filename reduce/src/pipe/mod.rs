//! The pipeline scheduling variants.
//!
//! Every variant walks the same chain (head → relays → root) and differs
//! only in how transfers, merges and buffers interleave. All of them share
//! the contract that the root's receive buffer holds the elementwise sum on
//! return and that transport failures abort the call.

mod isend_irecv;
mod send_recv;
mod sendrecv;
mod stream;

pub(crate) use isend_irecv::reduce_isend_irecv;
pub(crate) use send_recv::reduce_send_recv;
pub(crate) use sendrecv::reduce_sendrecv;
pub(crate) use stream::{reduce_stream, StreamMode};
