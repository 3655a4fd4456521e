//! Process-level communication backends.
//!
//! A [`Comm`] connects the ranks that share a distributed array. Besides the collective
//! operations the solver layer needs (barrier, all-reduce), it offers a two-phase
//! point-to-point exchange: [`Comm::start_exchange`] posts every outgoing message without
//! blocking and [`Comm::finish_exchange`] blocks until all expected messages have arrived.
//! The ghost exchange engine builds on exactly these two calls.
//!
//! Backends:
//! - [`SerialComm`]: one rank, no peers.
//! - [`ThreadComm`]: ranks living on threads of one process, connected by channels.
//! - `MpiComm`: MPI ranks (requires the `mpi` feature).

use std::cell::Cell;

use crate::error::GtError;

/// Largest exchange tag; MPI guarantees tags up to this value.
pub(crate) const MAX_EXCHANGE_TAG: u16 = 32767;

// Hands out 1, 2, ..., MAX_EXCHANGE_TAG, then starts over.
pub(crate) fn next_tag(sequence: &Cell<u16>) -> u16 {
    let tag = sequence.get();
    sequence.set(if tag >= MAX_EXCHANGE_TAG { 1 } else { tag + 1 });
    tag
}

/// A message bound for, or received from, one peer rank.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub peer: usize,
    pub data: Vec<f64>,
}

/// Handle for an exchange posted with [`Comm::start_exchange`].
///
/// `deferred` holds outgoing messages a backend chose not to post yet; `expected` lists
/// `(peer, length)` for every incoming message in the order `finish_exchange` returns them.
#[derive(Debug)]
pub struct Exchange {
    pub tag: u16,
    pub deferred: Vec<Message>,
    pub expected: Vec<(usize, usize)>,
}

impl Exchange {
    pub fn new(tag: u16, deferred: Vec<Message>, expected: Vec<(usize, usize)>) -> Self {
        Self { tag, deferred, expected }
    }
}

pub trait Comm {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn barrier(&self);
    /// Sum `x` over all ranks. Every rank receives the same value.
    fn all_reduce(&self, x: f64) -> Result<f64, GtError>;
    /// Tag for the next exchange. Ranks draw tags in the order they start exchanges, so
    /// the n-th exchange started on every rank carries the same tag.
    fn exchange_tag(&self) -> u16;
    /// Post non-blocking sends to peers and register the receives expected from peers.
    fn start_exchange(
        &self,
        tag: u16,
        sends: Vec<Message>,
        recvs: &[(usize, usize)],
    ) -> Result<Exchange, GtError>;
    /// Wait for every transfer of `exchange`; returns the received messages in the order
    /// they were registered.
    fn finish_exchange(&self, exchange: Exchange) -> Result<Vec<Message>, GtError>;
}

/// Single-rank communicator.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialComm;

impl Comm for SerialComm {
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn barrier(&self) {}
    fn all_reduce(&self, x: f64) -> Result<f64, GtError> {
        Ok(x)
    }
    fn exchange_tag(&self) -> u16 {
        1
    }
    fn start_exchange(
        &self,
        tag: u16,
        sends: Vec<Message>,
        recvs: &[(usize, usize)],
    ) -> Result<Exchange, GtError> {
        if let Some(msg) = sends.first() {
            return Err(GtError::Communication(format!(
                "serial communicator cannot send to rank {}",
                msg.peer
            )));
        }
        if let Some(&(peer, _)) = recvs.first() {
            return Err(GtError::Communication(format!(
                "serial communicator cannot receive from rank {peer}"
            )));
        }
        Ok(Exchange::new(tag, Vec::new(), Vec::new()))
    }
    fn finish_exchange(&self, _exchange: Exchange) -> Result<Vec<Message>, GtError> {
        Ok(Vec::new())
    }
}

pub mod thread_comm;
pub use thread_comm::ThreadComm;

#[cfg(feature = "mpi")]
pub mod mpi_comm;
#[cfg(feature = "mpi")]
pub use mpi_comm::MpiComm;
