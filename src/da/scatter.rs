//! Transfer plans: who sends which node to whom.
//!
//! A plan is built independently on every rank from the shared [`GridLayout`]. The receive
//! side walks this rank's ghost box; the send side walks every other rank's ghost box in
//! the same order, so the values packed by the owner line up with the offsets the
//! receiver unpacks into without any handshake.

use std::collections::BTreeMap;

use tracing::trace;

use super::layout::{GridBox, GridLayout};

/// Which pair of vectors a plan moves data between.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PlanKind {
    /// Owned entries of a global vector into a ghosted local vector (owned cells included).
    GlobalToLocal,
    /// Owned cells of a local vector into the ghost cells of another local vector.
    LocalToLocal,
}

/// Node offsets exchanged with one peer, in packing order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerList {
    pub peer: usize,
    pub nodes: Vec<usize>,
}

#[derive(Clone, Debug)]
pub struct TransferPlan {
    pub(crate) kind: PlanKind,
    pub(crate) dof: usize,
    pub(crate) src_len: usize,
    pub(crate) dst_len: usize,
    /// `(source node, destination node)` pairs served by this rank itself.
    pub(crate) local: Vec<(usize, usize)>,
    pub(crate) sends: Vec<PeerList>,
    pub(crate) recvs: Vec<PeerList>,
}

impl TransferPlan {
    pub(crate) fn build(layout: &GridLayout, rank: usize, kind: PlanKind) -> Self {
        let owned = layout.owned_box(rank);
        let ghost = layout.ghost_box(rank);
        let base = layout.rank_base(rank);
        // source node of an in-domain cell this rank owns
        let src_node = |c: [usize; 3]| -> usize {
            let ci = c.map(|x| x as isize);
            match kind {
                PlanKind::GlobalToLocal => owned.offset(ci),
                PlanKind::LocalToLocal => ghost.offset(ci),
            }
        };

        let mut local = Vec::new();
        let mut recvs: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for c in ghost.cells() {
            if !wants(layout, kind, &owned, c) {
                continue;
            }
            let Some(at) = layout.resolve(c) else { continue };
            let Some(from) = layout.owner(at) else { continue };
            let dst = ghost.offset(c);
            if from == rank {
                local.push((src_node(at), dst));
            } else {
                recvs.entry(from).or_default().push(dst);
            }
        }

        let mut sends: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for peer in (0..layout.size()).filter(|&q| q != rank) {
            let peer_owned = layout.owned_box(peer);
            let peer_ghost = layout.ghost_box(peer);
            if !may_touch(layout, &peer_ghost, &owned) {
                continue;
            }
            for c in peer_ghost.cells() {
                if !wants(layout, kind, &peer_owned, c) {
                    continue;
                }
                let Some(at) = layout.resolve(c) else { continue };
                if layout.owner(at) == Some(rank) {
                    sends.entry(peer).or_default().push(src_node(at));
                }
            }
        }

        let collect = |m: BTreeMap<usize, Vec<usize>>| -> Vec<PeerList> {
            m.into_iter().map(|(peer, nodes)| PeerList { peer, nodes }).collect()
        };
        let plan = Self {
            kind,
            dof: layout.dof,
            src_len: match kind {
                PlanKind::GlobalToLocal => owned.len() * layout.dof,
                PlanKind::LocalToLocal => ghost.len() * layout.dof,
            },
            dst_len: ghost.len() * layout.dof,
            local,
            sends: collect(sends),
            recvs: collect(recvs),
        };
        trace!(
            rank,
            ?kind,
            local = plan.local.len(),
            send_peers = plan.sends.len(),
            recv_peers = plan.recvs.len(),
            base,
            "built transfer plan"
        );
        plan
    }

    pub fn kind(&self) -> PlanKind {
        self.kind
    }

    /// Number of values (nodes times dof) sent to `peer` per transfer.
    pub fn send_count(&self, peer: usize) -> usize {
        self.sends
            .iter()
            .find(|l| l.peer == peer)
            .map_or(0, |l| l.nodes.len() * self.dof)
    }

    /// Number of values received from `peer` per transfer.
    pub fn recv_count(&self, peer: usize) -> usize {
        self.recvs
            .iter()
            .find(|l| l.peer == peer)
            .map_or(0, |l| l.nodes.len() * self.dof)
    }

    /// Every rank this plan talks to, ascending.
    pub fn peers(&self) -> Vec<usize> {
        let mut peers: Vec<usize> = self
            .sends
            .iter()
            .chain(&self.recvs)
            .map(|l| l.peer)
            .collect();
        peers.sort_unstable();
        peers.dedup();
        peers
    }

    /// Number of entries copied within this rank per transfer.
    pub fn local_count(&self) -> usize {
        self.local.len() * self.dof
    }
}

// Does the destination side of a `kind` transfer fill cell `c` of a ghost box around `owned`?
fn wants(layout: &GridLayout, kind: PlanKind, owned: &GridBox, c: [isize; 3]) -> bool {
    if owned.contains(c) {
        return kind == PlanKind::GlobalToLocal;
    }
    !layout.is_skipped_corner(owned, c)
}

// Cheap rejection of peers whose ghost box cannot overlap `owned`.
fn may_touch(layout: &GridLayout, ghost: &GridBox, owned: &GridBox) -> bool {
    (0..3).all(|d| {
        layout.periodic.along(d) || (ghost.start[d] < owned.end[d] && owned.start[d] < ghost.end[d])
    })
}
