//! Distributed 3-component cross products over MPI-style collectives on a single machine.
//!
//! This library splits an elementwise binary vector operation (the 3D cross product)
//! across a fixed group of cooperating workers. A coordinator (rank 0) owns the full
//! input arrays, broadcasts the problem size, scatters equal contiguous chunks to every
//! worker, and gathers the per-worker partial results back into one ordered output array.
//!
//! # Features
//!
//! - **Partition planning**: compute and validate the equal-chunk split before any data moves
//! - **Collective Operations**: broadcast, scatter, and gather data across workers
//! - **Pluggable group backends**: shared-memory processes for deployment, rendezvous
//!   channels for in-process testing
//! - **Uniform abort**: an invalid split or a failed input read terminates every worker
//!   without leaving anyone blocked at the broadcast
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use cross_mpi::{run, ProcessGroup};
//! use std::io;
//!
//! // Form a group of 4 worker processes; rank 0 is the coordinator.
//! let group = ProcessGroup::init(4).unwrap();
//!
//! // Rank 0 reads N and the vectors from stdin and prints the result;
//! // every other rank computes its chunk and sends it back.
//! let stdin = io::stdin();
//! let mut stdout = io::stdout();
//! run(&group, stdin.lock(), &mut stdout).unwrap();
//!
//! group.destruct();
//! ```
//!
//! # Architecture
//!
//! Every worker runs the same five-phase state machine: await the broadcast of `N`,
//! validate the partition plan, await its scatter chunks of A and B, compute the cross
//! products locally, and emit its output chunk to the gather. The coordinator runs the
//! identical phases plus input acquisition and result reporting. All collectives are
//! blocking and barrier-terminated, so no worker observes a later phase before every
//! worker has completed the current one.
//!
//! The production backend uses POSIX shared memory (`/dev/shm` on Linux) with a
//! dedicated message slot per worker pair, exactly one process per rank.
//!
//! # Error Handling
//!
//! All operations return a `Result` with detailed variants through [`Error`]. An uneven
//! partition is not an infrastructure failure: it is reported once by the coordinator
//! and every worker aborts the run uniformly before any chunk is transmitted.

use thiserror::Error;

pub mod group;
pub mod io;
pub mod kernel;
pub mod plan;
pub mod runtime;
pub mod shmem;

pub use group::{GroupChannel, ThreadGroup};
pub use kernel::{cross, cross_chunk, Vec3};
pub use plan::PartitionPlan;
pub use runtime::{run, run_coordinator, run_member, RunOutcome, COORDINATOR_RANK};
pub use shmem::ProcessGroup;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid rank: {0}")]
    InvalidRank(usize),
    #[error("Communication error: {0}")]
    Communication(String),
    #[error("Initialization error: {0}")]
    Init(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Shared memory error: {0}")]
    SharedMemory(String),
    #[error("Process error: {0}")]
    Process(String),
    #[error("Error: {vectors} vectors (3 * {vectors} scalars) cannot be split evenly across {workers} workers")]
    UnevenPartition { vectors: usize, workers: usize },
    #[error("Input error: {0}")]
    Input(String),
    #[error("Output error: {0}")]
    Output(String),
}

pub type Result<T> = std::result::Result<T, Error>;
