//! Point-to-point transport for the pipelined reduction.
//!
//! The schedulers only ever talk to the [`Transport`] trait; the backends
//! are an in-process channel world for tests and single-machine runs, and
//! an MPI binding behind the `mpi` feature.

mod local;
#[cfg(feature = "mpi")]
mod mpi_comm;
mod traits;

pub use local::{local_world, LocalComm};
#[cfg(feature = "mpi")]
pub use mpi_comm::MpiComm;
pub use traits::{CommError, Transport};
