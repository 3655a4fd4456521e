//! In-process communicator: one rank per thread, channels in between.
//!
//! `ThreadComm::universe(n)` returns `n` communicators; move each into its own thread and
//! they behave like the ranks of an `n`-process job. Messages between a given pair of ranks
//! with the same tag are delivered in the order they were sent. Sends never block; receives
//! block until the matching message arrives, with no timeout.

use std::cell::{Cell, RefCell};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Barrier};

use super::{next_tag, Comm, Exchange, Message};
use crate::error::GtError;

const REDUCE_TAG: u16 = u16::MAX;

#[derive(Debug)]
struct Envelope {
    source: usize,
    tag: u16,
    data: Vec<f64>,
}

/// Channel-backed communicator for ranks that run as threads of one process.
pub struct ThreadComm {
    rank: usize,
    size: usize,
    senders: Vec<Sender<Envelope>>,
    inbox: Receiver<Envelope>,
    // arrived but not yet asked for
    stash: RefCell<Vec<Envelope>>,
    sequence: Cell<u16>,
    barrier: Arc<Barrier>,
}

impl ThreadComm {
    /// Create the communicators of an `size`-rank job, indexed by rank.
    pub fn universe(size: usize) -> Vec<ThreadComm> {
        let (senders, inboxes): (Vec<_>, Vec<_>) = (0..size).map(|_| channel()).unzip();
        let barrier = Arc::new(Barrier::new(size.max(1)));
        inboxes
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| ThreadComm {
                rank,
                size,
                senders: senders.clone(),
                inbox,
                stash: RefCell::new(Vec::new()),
                sequence: Cell::new(1),
                barrier: Arc::clone(&barrier),
            })
            .collect()
    }

    fn post(&self, peer: usize, tag: u16, data: Vec<f64>) -> Result<(), GtError> {
        let sender = self.senders.get(peer).ok_or_else(|| {
            GtError::Communication(format!("rank {peer} outside communicator of size {}", self.size))
        })?;
        sender
            .send(Envelope { source: self.rank, tag, data })
            .map_err(|_| GtError::Communication(format!("rank {peer} is no longer reachable")))
    }

    fn receive(&self, source: usize, tag: u16) -> Result<Vec<f64>, GtError> {
        {
            let mut stash = self.stash.borrow_mut();
            if let Some(pos) = stash.iter().position(|e| e.source == source && e.tag == tag) {
                return Ok(stash.remove(pos).data);
            }
        }
        loop {
            let env = self.inbox.recv().map_err(|_| {
                GtError::Communication(format!(
                    "rank {} lost all peers while waiting on rank {source}",
                    self.rank
                ))
            })?;
            if env.source == source && env.tag == tag {
                return Ok(env.data);
            }
            self.stash.borrow_mut().push(env);
        }
    }
}

impl Comm for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.size
    }
    fn barrier(&self) {
        self.barrier.wait();
    }
    fn all_reduce(&self, x: f64) -> Result<f64, GtError> {
        for peer in (0..self.size).filter(|&p| p != self.rank) {
            self.post(peer, REDUCE_TAG, vec![x])?;
        }
        // Sum in rank order so every rank produces the same bits.
        let mut total = 0.0;
        for peer in 0..self.size {
            if peer == self.rank {
                total += x;
            } else {
                let data = self.receive(peer, REDUCE_TAG)?;
                total += data.first().copied().ok_or_else(|| {
                    GtError::Communication(format!("empty reduction message from rank {peer}"))
                })?;
            }
        }
        Ok(total)
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
        if tag == REDUCE_TAG {
            return Err(GtError::Communication(format!("tag {tag} is reserved")));
        }
        for msg in sends {
            self.post(msg.peer, tag, msg.data)?;
        }
        Ok(Exchange::new(tag, Vec::new(), recvs.to_vec()))
    }
    fn finish_exchange(&self, exchange: Exchange) -> Result<Vec<Message>, GtError> {
        for msg in exchange.deferred {
            self.post(msg.peer, exchange.tag, msg.data)?;
        }
        exchange
            .expected
            .iter()
            .map(|&(peer, len)| {
                let data = self.receive(peer, exchange.tag)?;
                GtError::check_len("received ghost message", len, data.len())
                    .map_err(|e| GtError::Communication(e.to_string()))?;
                Ok(Message { peer, data })
            })
            .collect()
    }
}
