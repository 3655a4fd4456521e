//! MPI-based parallel communication module.
//!
//! This module provides an implementation of the `Comm` trait using the MPI (Message Passing Interface)
//! backend for distributed-memory parallelism. It is only available when the `mpi` feature is enabled.
//!
//! # Exchange model
//!
//! rsmpi ties non-blocking requests to a scope that must close before the buffers are released,
//! so `start_exchange` keeps the packed send buffers in the returned [`Exchange`] and
//! `finish_exchange` posts all sends and receives as immediate operations inside one scope and
//! waits on them. Local work between the two calls therefore overlaps packing, not transport.
//!
//! # Example
//! ```no_run
//! # #[cfg(feature = "mpi")]
//! # {
//! use gridtao::parallel::{Comm, MpiComm};
//! let comm = MpiComm::new().unwrap();
//! println!("Rank: {} / {}", comm.rank(), comm.size());
//! comm.barrier();
//! # }
//! ```

use mpi::collective::SystemOperation;
use mpi::environment::Universe;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;

use std::cell::Cell;

use super::{next_tag, Comm, Exchange, Message};
use crate::error::GtError;

/// MPI communicator wrapper for distributed parallelism.
///
/// Holds the MPI universe (finalized on drop), the world communicator, the rank of the current
/// process, and the total number of processes.
pub struct MpiComm {
    /// The MPI world communicator (all processes in the job).
    pub world: SimpleCommunicator,
    /// The rank (ID) of this process within the communicator.
    pub rank: usize,
    /// The total number of processes in the communicator.
    pub size: usize,
    sequence: Cell<u16>,
    _universe: Universe,
}

impl MpiComm {
    /// Initializes MPI and constructs a new `MpiComm` instance.
    pub fn new() -> Result<Self, GtError> {
        let universe = mpi::initialize()
            .ok_or_else(|| GtError::Communication("MPI was already initialized".into()))?;
        let world = universe.world();
        let rank = world.rank() as usize;
        let size = world.size() as usize;
        Ok(MpiComm { world, rank, size, sequence: Cell::new(1), _universe: universe })
    }
}

impl Comm for MpiComm {
    /// Returns the rank (ID) of this process.
    fn rank(&self) -> usize {
        self.rank
    }
    /// Returns the total number of processes in the communicator.
    fn size(&self) -> usize {
        self.size
    }
    /// Synchronizes all processes at a barrier.
    fn barrier(&self) {
        self.world.barrier();
    }

    /// Performs an all-reduce sum operation across all processes.
    fn all_reduce(&self, x: f64) -> Result<f64, GtError> {
        let mut y = x;
        self.world.all_reduce_into(&x, &mut y, SystemOperation::sum());
        Ok(y)
    }

    fn exchange_tag(&self) -> u16 {
        next_tag(&self.sequence)
    }

    fn start_exchange(
        &self,
        tag: u16,
        sends: Vec<Message>,
        recvs: &[(usize, usize)],
    ) -> Result<Exchange, GtError> {
        for &(peer, _) in recvs {
            if peer >= self.size {
                return Err(GtError::Communication(format!(
                    "rank {peer} outside communicator of size {}",
                    self.size
                )));
            }
        }
        Ok(Exchange::new(tag, sends, recvs.to_vec()))
    }

    fn finish_exchange(&self, exchange: Exchange) -> Result<Vec<Message>, GtError> {
        let tag = exchange.tag as i32;
        let mut buffers: Vec<Vec<f64>> = exchange
            .expected
            .iter()
            .map(|&(_, len)| vec![0.0; len])
            .collect();
        mpi::request::scope(|scope| {
            let sends: Vec<_> = exchange
                .deferred
                .iter()
                .map(|msg| {
                    self.world
                        .process_at_rank(msg.peer as i32)
                        .immediate_send_with_tag(scope, &msg.data[..], tag)
                })
                .collect();
            let recvs: Vec<_> = exchange
                .expected
                .iter()
                .zip(buffers.iter_mut())
                .map(|(&(peer, _), buf)| {
                    self.world
                        .process_at_rank(peer as i32)
                        .immediate_receive_into_with_tag(scope, &mut buf[..], tag)
                })
                .collect();
            for req in recvs {
                req.wait();
            }
            for req in sends {
                req.wait();
            }
        });
        Ok(exchange
            .expected
            .iter()
            .zip(buffers)
            .map(|(&(peer, _), data)| Message { peer, data })
            .collect())
    }
}
