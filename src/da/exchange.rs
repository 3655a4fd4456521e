//! Executes a [`TransferPlan`] over a communicator in two phases.

use tracing::trace;

use super::scatter::{PlanKind, TransferPlan};
use crate::error::GtError;
use crate::parallel::{Comm, Exchange, Message};

/// How delivered values combine with what the destination already holds.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum InsertMode {
    #[default]
    Insert,
    Add,
}

impl InsertMode {
    #[inline]
    fn apply(self, slot: &mut f64, value: f64) {
        match self {
            InsertMode::Insert => *slot = value,
            InsertMode::Add => *slot += value,
        }
    }
}

/// A transfer between `begin` and `end`.
///
/// Holds the posted exchange plus the values this rank serves to itself, captured when the
/// transfer began, so the source vector is free again as soon as `begin` returns.
#[must_use = "a started transfer must be completed with the matching end call"]
#[derive(Debug)]
pub struct PendingTransfer {
    kind: PlanKind,
    mode: InsertMode,
    exchange: Exchange,
    local_values: Vec<f64>,
}

impl PendingTransfer {
    pub fn kind(&self) -> PlanKind {
        self.kind
    }

    pub fn mode(&self) -> InsertMode {
        self.mode
    }
}

impl TransferPlan {
    /// Pack outgoing values and post the exchange.
    pub(crate) fn begin(
        &self,
        comm: &dyn Comm,
        src: &[f64],
        mode: InsertMode,
    ) -> Result<PendingTransfer, GtError> {
        GtError::check_len(source_name(self.kind), self.src_len, src.len())?;
        let dof = self.dof;
        let gather = |nodes: &mut dyn Iterator<Item = usize>| -> Vec<f64> {
            nodes
                .flat_map(|n| src[n * dof..(n + 1) * dof].iter().copied())
                .collect()
        };
        let sends: Vec<Message> = self
            .sends
            .iter()
            .map(|l| Message {
                peer: l.peer,
                data: gather(&mut l.nodes.iter().copied()),
            })
            .collect();
        let local_values = gather(&mut self.local.iter().map(|&(s, _)| s));
        let expected: Vec<(usize, usize)> = self
            .recvs
            .iter()
            .map(|l| (l.peer, l.nodes.len() * dof))
            .collect();
        trace!(
            kind = ?self.kind,
            ?mode,
            sends = sends.len(),
            recvs = expected.len(),
            "transfer begin"
        );
        // a fresh tag per transfer keeps overlapping transfers apart
        let exchange = comm.start_exchange(comm.exchange_tag(), sends, &expected)?;
        Ok(PendingTransfer { kind: self.kind, mode, exchange, local_values })
    }

    /// Wait for every incoming message and scatter it, plus the captured local values,
    /// into `dst`.
    pub(crate) fn end(
        &self,
        comm: &dyn Comm,
        pending: PendingTransfer,
        dst: &mut [f64],
    ) -> Result<(), GtError> {
        if pending.kind != self.kind {
            return Err(GtError::Unsupported(
                "transfer handle was started by a different plan",
            ));
        }
        GtError::check_len("local vector", self.dst_len, dst.len())?;
        let PendingTransfer { mode, exchange, local_values, .. } = pending;
        let dof = self.dof;
        let received = comm.finish_exchange(exchange)?;
        if received.len() != self.recvs.len() {
            return Err(GtError::Communication(format!(
                "expected messages from {} peers, got {}",
                self.recvs.len(),
                received.len()
            )));
        }
        for (msg, list) in received.iter().zip(&self.recvs) {
            if msg.peer != list.peer || msg.data.len() != list.nodes.len() * dof {
                return Err(GtError::Communication(format!(
                    "message from rank {} does not match the plan for rank {}",
                    msg.peer, list.peer
                )));
            }
            scatter(mode, dof, &list.nodes, &msg.data, dst);
        }
        let local_dst: Vec<usize> = self.local.iter().map(|&(_, d)| d).collect();
        scatter(mode, dof, &local_dst, &local_values, dst);
        trace!(kind = ?self.kind, peers = received.len(), "transfer end");
        Ok(())
    }
}

fn scatter(mode: InsertMode, dof: usize, nodes: &[usize], values: &[f64], dst: &mut [f64]) {
    for (&n, chunk) in nodes.iter().zip(values.chunks_exact(dof)) {
        for (slot, &v) in dst[n * dof..(n + 1) * dof].iter_mut().zip(chunk) {
            mode.apply(slot, v);
        }
    }
}

fn source_name(kind: PlanKind) -> &'static str {
    match kind {
        PlanKind::GlobalToLocal => "global vector",
        PlanKind::LocalToLocal => "local vector",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::da::layout::{GridLayout, Periodic, StencilType};
    use crate::da::partition::PartitionMap;
    use crate::parallel::SerialComm;

    fn serial_layout(m: usize, s: usize, dof: usize) -> GridLayout {
        let parts = [
            PartitionMap::new(m, 1).unwrap(),
            PartitionMap::new(1, 1).unwrap(),
            PartitionMap::new(1, 1).unwrap(),
        ];
        GridLayout::new(1, [m, 1, 1], parts, dof, s, StencilType::Box, Periodic::X)
    }

    #[test]
    fn add_mode_accumulates_local_copies() {
        let layout = serial_layout(4, 1, 2);
        let plan = TransferPlan::build(&layout, 0, PlanKind::GlobalToLocal);
        let global: Vec<f64> = (0..8).map(f64::from).collect();
        let mut local = vec![1.0; 12];
        let p = plan.begin(&SerialComm, &global, InsertMode::Add).unwrap();
        plan.end(&SerialComm, p, &mut local).unwrap();
        // ghost at x = -1 wraps to node 3 = [6, 7]
        assert_eq!(&local[..2], &[7.0, 8.0]);
        assert_eq!(&local[2..4], &[1.0, 2.0]);
        assert_eq!(&local[10..], &[1.0, 2.0]);
    }

    #[test]
    fn wrong_lengths_are_rejected_before_communication() {
        let layout = serial_layout(4, 1, 1);
        let plan = TransferPlan::build(&layout, 0, PlanKind::GlobalToLocal);
        let err = plan.begin(&SerialComm, &[0.0; 3], InsertMode::Insert).unwrap_err();
        assert!(matches!(err, GtError::VectorSize { expected: 4, got: 3, .. }));
        let p = plan.begin(&SerialComm, &[0.0; 4], InsertMode::Insert).unwrap();
        let mut short = vec![0.0; 5];
        assert!(matches!(
            plan.end(&SerialComm, p, &mut short),
            Err(GtError::VectorSize { expected: 6, got: 5, .. })
        ));
    }

    #[test]
    fn handle_from_other_plan_is_refused() {
        let layout = serial_layout(4, 1, 1);
        let gtol = TransferPlan::build(&layout, 0, PlanKind::GlobalToLocal);
        let ltol = TransferPlan::build(&layout, 0, PlanKind::LocalToLocal);
        let p = gtol.begin(&SerialComm, &[0.0; 4], InsertMode::Insert).unwrap();
        let mut local = vec![0.0; 6];
        assert!(matches!(ltol.end(&SerialComm, p, &mut local), Err(GtError::Unsupported(_))));
    }
}
