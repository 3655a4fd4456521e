//! Index geometry of a distributed array, shared by every rank.
//!
//! All boxes use signed coordinates: a ghost box extends the owned box by the stencil width
//! on both sides of every active dimension, so it may reach below zero or past the global
//! extent. [`GridLayout::resolve`] maps such coordinates back into the domain (wrapping
//! periodic dimensions) or reports that the cell does not exist.

use bitflags::bitflags;

use super::partition::PartitionMap;

bitflags! {
    /// Dimensions along which the grid wraps around.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct Periodic: u32 {
        const X = 0b001;
        const Y = 0b010;
        const Z = 0b100;
    }
}

impl Periodic {
    pub fn along(self, d: usize) -> bool {
        match d {
            0 => self.contains(Periodic::X),
            1 => self.contains(Periodic::Y),
            2 => self.contains(Periodic::Z),
            _ => false,
        }
    }
}

/// Shape of the ghost region.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum StencilType {
    /// Only cells differing from the owned box in a single dimension are ghosts.
    Star,
    #[default]
    Box,
}

/// Half-open box `[start, end)` in (possibly out-of-domain) grid coordinates.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GridBox {
    pub start: [isize; 3],
    pub end: [isize; 3],
}

impl GridBox {
    pub fn extent(&self) -> [usize; 3] {
        [0, 1, 2].map(|d| (self.end[d] - self.start[d]) as usize)
    }

    pub fn len(&self) -> usize {
        self.extent().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, c: [isize; 3]) -> bool {
        (0..3).all(|d| self.start[d] <= c[d] && c[d] < self.end[d])
    }

    /// Row-major position of `c` inside the box (x fastest).
    pub fn offset(&self, c: [isize; 3]) -> usize {
        let e = self.extent();
        let rel = [0, 1, 2].map(|d| (c[d] - self.start[d]) as usize);
        (rel[2] * e[1] + rel[1]) * e[0] + rel[0]
    }

    /// Coordinates of every cell, x fastest.
    pub fn cells(&self) -> impl Iterator<Item = [isize; 3]> + '_ {
        (self.start[2]..self.end[2]).flat_map(move |k| {
            (self.start[1]..self.end[1])
                .flat_map(move |j| (self.start[0]..self.end[0]).map(move |i| [i, j, k]))
        })
    }

    fn grow(&self, width: usize, dim: usize) -> GridBox {
        let mut b = *self;
        for d in 0..dim {
            b.start[d] -= width as isize;
            b.end[d] += width as isize;
        }
        b
    }
}

#[derive(Clone, Debug)]
pub(crate) struct GridLayout {
    pub dim: usize,
    pub global: [usize; 3],
    pub procs: [usize; 3],
    pub dof: usize,
    pub width: usize,
    pub stencil: StencilType,
    pub periodic: Periodic,
    parts: [PartitionMap; 3],
    // global-vector node offset of each rank's first owned node
    rank_base: Vec<usize>,
}

impl GridLayout {
    pub fn new(
        dim: usize,
        global: [usize; 3],
        parts: [PartitionMap; 3],
        dof: usize,
        width: usize,
        stencil: StencilType,
        periodic: Periodic,
    ) -> Self {
        let procs = [0, 1, 2].map(|d| parts[d].nprocs());
        let size: usize = procs.iter().product();
        let mut layout = Self {
            dim,
            global,
            procs,
            dof,
            width,
            stencil,
            periodic,
            parts,
            rank_base: Vec::with_capacity(size + 1),
        };
        let mut base = 0;
        for r in 0..size {
            layout.rank_base.push(base);
            base += layout.owned_box(r).len();
        }
        layout.rank_base.push(base);
        layout
    }

    pub fn size(&self) -> usize {
        self.procs.iter().product()
    }

    pub fn parts(&self) -> &[PartitionMap; 3] {
        &self.parts
    }

    pub fn proc_coords(&self, rank: usize) -> [usize; 3] {
        let [m, n, _] = self.procs;
        [rank % m, (rank / m) % n, rank / (m * n)]
    }

    pub fn rank_of(&self, p: [usize; 3]) -> usize {
        let [m, n, _] = self.procs;
        p[0] + p[1] * m + p[2] * m * n
    }

    pub fn owned_box(&self, rank: usize) -> GridBox {
        let p = self.proc_coords(rank);
        let r = [0, 1, 2].map(|d| self.parts[d].range(p[d]));
        GridBox {
            start: [0, 1, 2].map(|d| r[d].start as isize),
            end: [0, 1, 2].map(|d| r[d].end as isize),
        }
    }

    pub fn ghost_box(&self, rank: usize) -> GridBox {
        self.owned_box(rank).grow(self.width, self.dim)
    }

    /// Node offset of `rank`'s block in a global vector.
    pub fn rank_base(&self, rank: usize) -> usize {
        self.rank_base[rank]
    }

    /// Map a coordinate into the domain; `None` past a non-periodic edge.
    pub fn resolve(&self, c: [isize; 3]) -> Option<[usize; 3]> {
        let mut out = [0usize; 3];
        for d in 0..3 {
            let extent = self.global[d] as isize;
            out[d] = if (0..extent).contains(&c[d]) {
                c[d] as usize
            } else if self.periodic.along(d) {
                c[d].rem_euclid(extent) as usize
            } else {
                return None;
            };
        }
        Some(out)
    }

    /// Application (natural) ordering index of an in-domain node.
    pub fn natural(&self, c: [usize; 3]) -> usize {
        c[0] + c[1] * self.global[0] + c[2] * self.global[0] * self.global[1]
    }

    pub fn natural_coords(&self, natural: usize) -> [usize; 3] {
        let [mx, my, _] = self.global;
        [natural % mx, (natural / mx) % my, natural / (mx * my)]
    }

    pub fn owner(&self, c: [usize; 3]) -> Option<usize> {
        let mut p = [0usize; 3];
        for d in 0..3 {
            p[d] = self.parts[d].owner(c[d])?;
        }
        Some(self.rank_of(p))
    }

    /// Owning rank and global-vector node index of an in-domain node.
    pub fn global_node(&self, c: [usize; 3]) -> Option<(usize, usize)> {
        let owner = self.owner(c)?;
        let owned = self.owned_box(owner);
        let ci = c.map(|x| x as isize);
        Some((owner, self.rank_base[owner] + owned.offset(ci)))
    }

    /// True for ghost cells a star stencil never reads: outside `owned` in more than one
    /// dimension.
    pub fn is_skipped_corner(&self, owned: &GridBox, c: [isize; 3]) -> bool {
        self.stencil == StencilType::Star
            && (0..3)
                .filter(|&d| c[d] < owned.start[d] || c[d] >= owned.end[d])
                .count()
                > 1
    }
}
