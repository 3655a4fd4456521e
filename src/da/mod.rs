//! Distributed structured arrays.
//!
//! A [`DistributedArray`] splits a logically rectangular 1-, 2- or 3-D grid of nodes, each
//! carrying `dof` values, over the ranks of a communicator. Every rank owns one box of
//! nodes and keeps two views of a field:
//!
//! - a **global** vector holding only the owned nodes (process-blocked: rank 0's box first,
//!   then rank 1's, each box x fastest, dof innermost), and
//! - a **local** vector holding the owned box grown by the stencil width on every side of
//!   every active dimension. Cells past a non-periodic edge exist in the local vector but
//!   have no global counterpart; they are never written by a transfer.
//!
//! Ghost values are filled by the two-phase `*_begin` / `*_end` transfers, which return and
//! consume a [`PendingTransfer`] so local work can run while messages are in flight.

pub mod exchange;
pub mod layout;
pub mod partition;
pub mod scatter;

use std::sync::Arc;

use tracing::debug;

use crate::config::OptionsDb;
use crate::error::GtError;
use crate::parallel::Comm;

pub use exchange::{InsertMode, PendingTransfer};
pub use layout::{GridBox, Periodic, StencilType};
pub use partition::{choose_layout, PartitionMap};
pub use scatter::{PeerList, PlanKind, TransferPlan};

use layout::GridLayout;

/// Static description of an array, as returned by [`DistributedArray::info`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DaInfo {
    pub dim: usize,
    pub global: [usize; 3],
    pub procs: [usize; 3],
    pub dof: usize,
    pub stencil_width: usize,
    pub stencil_type: StencilType,
    pub periodic: Periodic,
}

/// Builder for [`DistributedArray`].
///
/// ```
/// use std::sync::Arc;
/// use gridtao::{DaBuilder, Periodic, SerialComm, StencilType};
///
/// let da = DaBuilder::new(Arc::new(SerialComm))
///     .sizes(&[8, 6])
///     .stencil_type(StencilType::Star)
///     .periodic(Periodic::X)
///     .build()
///     .unwrap();
/// assert_eq!(da.global_size(), 48);
/// assert_eq!(da.ghosted_size(), 80);
/// ```
pub struct DaBuilder {
    comm: Arc<dyn Comm>,
    sizes: Vec<usize>,
    procs: [Option<usize>; 3],
    dof: usize,
    width: usize,
    stencil: StencilType,
    periodic: Periodic,
}

impl DaBuilder {
    pub fn new(comm: Arc<dyn Comm>) -> Self {
        Self {
            comm,
            sizes: vec![1],
            procs: [None; 3],
            dof: 1,
            width: 1,
            stencil: StencilType::Box,
            periodic: Periodic::empty(),
        }
    }

    /// Global node counts; the slice length sets the dimension.
    pub fn sizes(mut self, sizes: &[usize]) -> Self {
        self.sizes = sizes.to_vec();
        self
    }

    /// Processes per dimension. Entries left out are chosen automatically.
    pub fn processors(mut self, procs: &[usize]) -> Self {
        for (d, &p) in procs.iter().enumerate().take(3) {
            self.procs[d] = Some(p);
        }
        self
    }

    pub fn dof(mut self, dof: usize) -> Self {
        self.dof = dof;
        self
    }

    pub fn stencil_width(mut self, width: usize) -> Self {
        self.width = width;
        self
    }

    pub fn stencil_type(mut self, stencil: StencilType) -> Self {
        self.stencil = stencil;
        self
    }

    pub fn periodic(mut self, periodic: Periodic) -> Self {
        self.periodic = periodic;
        self
    }

    /// Override settings from `-da_grid_x|y|z`, `-da_processors_x|y|z`,
    /// `-da_stencil_width` and `-da_dof`.
    pub fn set_from_options(mut self, db: &OptionsDb, prefix: Option<&str>) -> Result<Self, GtError> {
        for (d, axis) in ["x", "y", "z"].iter().enumerate() {
            if let Some(n) = db.get_usize(prefix, &format!("-da_grid_{axis}"))? {
                if self.sizes.len() <= d {
                    self.sizes.resize(d + 1, 1);
                }
                self.sizes[d] = n;
            }
            if let Some(p) = db.get_usize(prefix, &format!("-da_processors_{axis}"))? {
                self.procs[d] = Some(p);
            }
        }
        if let Some(w) = db.get_usize(prefix, "-da_stencil_width")? {
            self.width = w;
        }
        if let Some(dof) = db.get_usize(prefix, "-da_dof")? {
            self.dof = dof;
        }
        Ok(self)
    }

    pub fn build(self) -> Result<DistributedArray, GtError> {
        let dim = self.sizes.len();
        if !(1..=3).contains(&dim) {
            return Err(GtError::Layout(format!("dimension must be 1, 2 or 3, got {dim}")));
        }
        if self.sizes.contains(&0) {
            return Err(GtError::Layout(format!("grid sizes {:?} contain a zero", self.sizes)));
        }
        if self.dof == 0 {
            return Err(GtError::Layout("degrees of freedom per node must be positive".into()));
        }
        let mut global = [1usize; 3];
        global[..dim].copy_from_slice(&self.sizes);
        for d in dim..3 {
            if self.periodic.along(d) {
                return Err(GtError::Layout(format!(
                    "periodicity requested along dimension {d} of a {dim}-D array"
                )));
            }
        }
        for d in 0..dim {
            if self.periodic.along(d) && self.width > global[d] {
                return Err(GtError::Layout(format!(
                    "stencil width {} exceeds periodic extent {} in dimension {d}",
                    self.width, global[d]
                )));
            }
        }

        let size = self.comm.size();
        let rank = self.comm.rank();
        let procs = choose_layout(size, dim, global, self.procs)?;
        let parts = [
            PartitionMap::new(global[0], procs[0])?,
            PartitionMap::new(global[1], procs[1])?,
            PartitionMap::new(global[2], procs[2])?,
        ];
        let layout = GridLayout::new(
            dim,
            global,
            parts,
            self.dof,
            self.width,
            self.stencil,
            self.periodic,
        );
        DistributedArray::from_layout(self.comm, layout, rank)
    }
}

/// A structured grid distributed over the ranks of a communicator.
pub struct DistributedArray {
    comm: Arc<dyn Comm>,
    layout: GridLayout,
    rank: usize,
    owned: GridBox,
    ghost: GridBox,
    ltog_map: Vec<Option<usize>>,
    // (local node, global node, node count) for each contiguous owned row
    ltog_runs: Vec<(usize, usize, usize)>,
    gtol: TransferPlan,
    ltol: TransferPlan,
}

impl DistributedArray {
    /// One-dimensional array with automatic layout.
    pub fn create_1d(
        comm: Arc<dyn Comm>,
        periodic: bool,
        m: usize,
        dof: usize,
        width: usize,
    ) -> Result<Self, GtError> {
        let wrap = if periodic { Periodic::X } else { Periodic::empty() };
        DaBuilder::new(comm)
            .sizes(&[m])
            .dof(dof)
            .stencil_width(width)
            .periodic(wrap)
            .build()
    }

    fn from_layout(comm: Arc<dyn Comm>, layout: GridLayout, rank: usize) -> Result<Self, GtError> {
        if rank >= layout.size() {
            return Err(GtError::Layout(format!(
                "rank {rank} outside a {}-process layout",
                layout.size()
            )));
        }
        let owned = layout.owned_box(rank);
        let ghost = layout.ghost_box(rank);
        let ltog_map = ghost
            .cells()
            .map(|c| layout.resolve(c).map(|at| layout.natural(at)))
            .collect();

        let base = layout.rank_base(rank);
        let row = owned.extent()[0];
        let mut ltog_runs = Vec::new();
        for k in owned.start[2]..owned.end[2] {
            for j in owned.start[1]..owned.end[1] {
                let c = [owned.start[0], j, k];
                ltog_runs.push((ghost.offset(c), base + owned.offset(c), row));
            }
        }

        let gtol = TransferPlan::build(&layout, rank, PlanKind::GlobalToLocal);
        let ltol = TransferPlan::build(&layout, rank, PlanKind::LocalToLocal);
        debug!(
            rank,
            dim = layout.dim,
            global = ?layout.global,
            procs = ?layout.procs,
            dof = layout.dof,
            width = layout.width,
            owned = ?owned,
            ghosted = ghost.len(),
            peers = ?gtol.peers(),
            "distributed array created"
        );
        Ok(Self { comm, layout, rank, owned, ghost, ltog_map, ltog_runs, gtol, ltol })
    }

    pub fn comm(&self) -> &dyn Comm {
        self.comm.as_ref()
    }

    pub fn info(&self) -> DaInfo {
        DaInfo {
            dim: self.layout.dim,
            global: self.layout.global,
            procs: self.layout.procs,
            dof: self.layout.dof,
            stencil_width: self.layout.width,
            stencil_type: self.layout.stencil,
            periodic: self.layout.periodic,
        }
    }

    pub fn dof(&self) -> usize {
        self.layout.dof
    }

    /// Owned box as `(start, extent)`.
    pub fn corners(&self) -> ([usize; 3], [usize; 3]) {
        (self.owned.start.map(|s| s as usize), self.owned.extent())
    }

    /// Ghosted box as `(start, extent)`; starts are negative next to a non-periodic edge or
    /// across a periodic one.
    pub fn ghost_corners(&self) -> ([isize; 3], [usize; 3]) {
        (self.ghost.start, self.ghost.extent())
    }

    /// Owned index ranges of every process along each dimension.
    pub fn ownership_ranges(&self) -> [Vec<std::ops::Range<usize>>; 3] {
        self.layout.parts().clone().map(|p| p.ranges().to_vec())
    }

    /// Global-vector node offset of this rank's first owned node.
    pub fn base(&self) -> usize {
        self.layout.rank_base(self.rank)
    }

    /// Natural index of every ghosted node (x fastest), `None` for nodes outside a
    /// non-periodic boundary.
    pub fn local_to_global_map(&self) -> &[Option<usize>] {
        &self.ltog_map
    }

    /// Length of the whole global vector, over all ranks.
    pub fn global_size(&self) -> usize {
        self.layout.global.iter().product::<usize>() * self.layout.dof
    }

    /// Length of this rank's piece of a global vector.
    pub fn local_size(&self) -> usize {
        self.owned.len() * self.layout.dof
    }

    /// Length of a local (ghosted) vector.
    pub fn ghosted_size(&self) -> usize {
        self.ghost.len() * self.layout.dof
    }

    pub fn create_global_vector(&self) -> Vec<f64> {
        vec![0.0; self.local_size()]
    }

    pub fn create_local_vector(&self) -> Vec<f64> {
        vec![0.0; self.ghosted_size()]
    }

    /// Index into a local vector of component `c` at grid point `(i, j, k)`.
    pub fn local_offset(&self, i: isize, j: isize, k: isize, c: usize) -> Option<usize> {
        let p = [i, j, k];
        (self.ghost.contains(p) && c < self.layout.dof)
            .then(|| self.ghost.offset(p) * self.layout.dof + c)
    }

    /// Index into this rank's piece of a global vector of component `c` at an owned point.
    pub fn global_offset(&self, i: usize, j: usize, k: usize, c: usize) -> Option<usize> {
        let p = [i as isize, j as isize, k as isize];
        (self.owned.contains(p) && c < self.layout.dof)
            .then(|| self.owned.offset(p) * self.layout.dof + c)
    }

    /// Process-blocked global node index of a natural (application-ordered) node index.
    pub fn natural_to_global(&self, natural: usize) -> Option<usize> {
        let nodes: usize = self.layout.global.iter().product();
        if natural >= nodes {
            return None;
        }
        let c = self.layout.natural_coords(natural);
        self.layout.global_node(c).map(|(_, g)| g)
    }

    /// Process-blocked global node index of a ghosted node, if it exists.
    pub fn local_node_to_global(&self, local_node: usize) -> Option<usize> {
        let natural = (*self.ltog_map.get(local_node)?)?;
        self.natural_to_global(natural)
    }

    pub fn global_to_local_plan(&self) -> &TransferPlan {
        &self.gtol
    }

    pub fn local_to_local_plan(&self) -> &TransferPlan {
        &self.ltol
    }

    /// Start filling a local vector (owned and ghost nodes) from a global vector.
    ///
    /// Outgoing values are packed here and the source vector is free once this returns.
    /// With [`SerialComm`](crate::parallel::SerialComm) and
    /// [`ThreadComm`](crate::parallel::ThreadComm) the messages are also sent here. The MPI
    /// backend only packs: its sends and receives are posted by
    /// [`global_to_local_end`](Self::global_to_local_end), so with MPI no transport
    /// overlaps the work done between the two calls.
    pub fn global_to_local_begin(
        &self,
        global: &[f64],
        mode: InsertMode,
    ) -> Result<PendingTransfer, GtError> {
        self.gtol.begin(self.comm(), global, mode)
    }

    pub fn global_to_local_end(
        &self,
        pending: PendingTransfer,
        local: &mut [f64],
    ) -> Result<(), GtError> {
        self.gtol.end(self.comm(), pending, local)
    }

    /// `global_to_local_begin` followed immediately by `global_to_local_end`.
    pub fn global_to_local(
        &self,
        global: &[f64],
        local: &mut [f64],
        mode: InsertMode,
    ) -> Result<(), GtError> {
        let pending = self.global_to_local_begin(global, mode)?;
        self.global_to_local_end(pending, local)
    }

    /// Copy (or add) the owned part of a local vector into this rank's piece of a global
    /// vector. Ghost entries are ignored; no communication takes place.
    pub fn local_to_global(
        &self,
        local: &[f64],
        global: &mut [f64],
        mode: InsertMode,
    ) -> Result<(), GtError> {
        GtError::check_len("local vector", self.ghosted_size(), local.len())?;
        GtError::check_len("global vector", self.local_size(), global.len())?;
        let dof = self.layout.dof;
        let base = self.base();
        for &(l, g, n) in &self.ltog_runs {
            let src = &local[l * dof..(l + n) * dof];
            let dst = &mut global[(g - base) * dof..(g - base + n) * dof];
            match mode {
                InsertMode::Insert => dst.copy_from_slice(src),
                InsertMode::Add => {
                    for (d, s) in dst.iter_mut().zip(src) {
                        *d += s;
                    }
                }
            }
        }
        Ok(())
    }

    /// Start refreshing ghost values from the owned values of `local_in`.
    ///
    /// Sends are posted as described for
    /// [`global_to_local_begin`](Self::global_to_local_begin).
    pub fn local_to_local_begin(
        &self,
        local_in: &[f64],
        mode: InsertMode,
    ) -> Result<PendingTransfer, GtError> {
        self.ltol.begin(self.comm(), local_in, mode)
    }

    /// Finish a ghost refresh into `local_out`, which may be the vector passed to begin.
    pub fn local_to_local_end(
        &self,
        pending: PendingTransfer,
        local_out: &mut [f64],
    ) -> Result<(), GtError> {
        self.ltol.end(self.comm(), pending, local_out)
    }

    /// Gather this rank's global piece in natural ordering positions: returns
    /// `(natural index, value)` pairs for every owned entry.
    pub fn global_to_natural(&self, global: &[f64]) -> Result<Vec<(usize, f64)>, GtError> {
        GtError::check_len("global vector", self.local_size(), global.len())?;
        let dof = self.layout.dof;
        Ok(self
            .owned
            .cells()
            .enumerate()
            .flat_map(|(n, c)| {
                let natural = self.layout.natural(c.map(|x| x as usize));
                (0..dof).map(move |comp| (natural * dof + comp, global[n * dof + comp]))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::SerialComm;

    fn serial() -> Arc<dyn Comm> {
        Arc::new(SerialComm)
    }

    #[test]
    fn rejects_inconsistent_inputs() {
        let cases = [
            DaBuilder::new(serial()).sizes(&[]),
            DaBuilder::new(serial()).sizes(&[4, 0]),
            DaBuilder::new(serial()).sizes(&[4]).dof(0),
            DaBuilder::new(serial()).sizes(&[4]).periodic(Periodic::Y),
            DaBuilder::new(serial()).sizes(&[3]).periodic(Periodic::X).stencil_width(4),
        ];
        for b in cases {
            assert!(matches!(b.build(), Err(GtError::Layout(_))));
        }
        let err = DaBuilder::new(serial()).sizes(&[4, 4]).processors(&[2, 1]).build();
        assert!(matches!(err, Err(GtError::InvalidLayout(_))));
    }

    #[test]
    fn serial_queries() {
        let da = DaBuilder::new(serial())
            .sizes(&[5, 4])
            .dof(2)
            .stencil_width(1)
            .build()
            .unwrap();
        assert_eq!(da.corners(), ([0, 0, 0], [5, 4, 1]));
        assert_eq!(da.ghost_corners(), ([-1, -1, 0], [7, 6, 1]));
        assert_eq!(da.local_size(), 40);
        assert_eq!(da.ghosted_size(), 84);
        assert_eq!(da.base(), 0);
        assert_eq!(da.local_offset(-1, -1, 0, 0), Some(0));
        assert_eq!(da.local_offset(0, 0, 0, 1), Some(17));
        assert_eq!(da.global_offset(4, 3, 0, 1), Some(39));
        assert_eq!(da.global_offset(5, 0, 0, 0), None);
        let map = da.local_to_global_map();
        assert_eq!(map.len(), 42);
        assert_eq!(map[0], None);
        assert_eq!(map[8], Some(0));
        assert_eq!(da.info().procs, [1, 1, 1]);
    }

    #[test]
    fn options_override_builder() {
        let db = OptionsDb::from_args(["-da_grid_x", "10", "-da_grid_y", "3", "-da_dof", "2"]);
        let da = DaBuilder::new(serial())
            .sizes(&[4])
            .set_from_options(&db, None)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(da.info().dim, 2);
        assert_eq!(da.info().global, [10, 3, 1]);
        assert_eq!(da.local_size(), 60);
    }

    #[test]
    fn natural_ordering_on_one_rank_is_identity() {
        let da = DaBuilder::new(serial()).sizes(&[3, 3]).build().unwrap();
        for n in 0..9 {
            assert_eq!(da.natural_to_global(n), Some(n));
        }
        assert_eq!(da.natural_to_global(9), None);
        let g: Vec<f64> = (0..9).map(f64::from).collect();
        let pairs = da.global_to_natural(&g).unwrap();
        assert!(pairs.iter().all(|&(n, v)| n as f64 == v));
    }
}
