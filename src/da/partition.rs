//! Per-dimension ownership ranges and processor-grid selection.
//!
//! A [`PartitionMap`] splits `[0, extent)` into `nprocs` contiguous ranges whose lengths
//! differ by at most one; the first `extent % nprocs` ranges carry the extra element.
//! [`choose_layout`] turns a communicator size and (optionally) a requested processor
//! grid into a validated `m × n × p` layout.

use std::ops::Range;

use crate::error::GtError;

/// Balanced block partition of one grid dimension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionMap {
    extent: usize,
    ranges: Vec<Range<usize>>,
}

impl PartitionMap {
    /// Partition `extent` indices over `nprocs` processes.
    ///
    /// Fails with [`GtError::InvalidLayout`] when `nprocs` is zero or exceeds `extent`
    /// (empty partitions are not allowed).
    pub fn new(extent: usize, nprocs: usize) -> Result<Self, GtError> {
        if nprocs == 0 {
            return Err(GtError::InvalidLayout("process count must be positive".into()));
        }
        if nprocs > extent {
            return Err(GtError::InvalidLayout(format!(
                "{nprocs} processes cannot share a dimension of extent {extent}"
            )));
        }
        let base = extent / nprocs;
        let extra = extent % nprocs;
        let mut start = 0;
        let ranges = (0..nprocs)
            .map(|p| {
                let len = base + usize::from(p < extra);
                let r = start..start + len;
                start += len;
                r
            })
            .collect();
        Ok(Self { extent, ranges })
    }

    pub fn extent(&self) -> usize {
        self.extent
    }

    pub fn nprocs(&self) -> usize {
        self.ranges.len()
    }

    /// Index range owned by process `p` along this dimension.
    pub fn range(&self, p: usize) -> Range<usize> {
        self.ranges[p].clone()
    }

    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }

    /// Process owning index `i`, or `None` if `i` is outside `[0, extent)`.
    pub fn owner(&self, i: usize) -> Option<usize> {
        if i >= self.extent {
            return None;
        }
        let n = self.ranges.len();
        let base = self.extent / n;
        let extra = self.extent % n;
        let split = extra * (base + 1);
        Some(if i < split {
            i / (base + 1)
        } else {
            extra + (i - split) / base
        })
    }
}

/// Pick the processor grid for a `dim`-dimensional array of `global` extents on `size` ranks.
///
/// `requested` entries that are `Some` are honoured as given; `None` entries are chosen
/// automatically. Dimensions at or beyond `dim` always get one process. Among all admissible
/// factorizations the one with the most compact blocks (smallest face area) wins; ties go to the
/// layout with more processes in the fastest-varying dimension.
pub fn choose_layout(
    size: usize,
    dim: usize,
    global: [usize; 3],
    requested: [Option<usize>; 3],
) -> Result<[usize; 3], GtError> {
    if size == 0 {
        return Err(GtError::InvalidLayout("communicator has no ranks".into()));
    }
    for d in dim..3 {
        if let Some(c) = requested[d] {
            if c != 1 {
                return Err(GtError::InvalidLayout(format!(
                    "dimension {d} is unused by a {dim}-D array but requests {c} processes"
                )));
            }
        }
    }
    if requested.iter().all(Option::is_some) {
        let layout = [requested[0].unwrap_or(1), requested[1].unwrap_or(1), requested[2].unwrap_or(1)];
        let product: usize = layout.iter().product();
        if product != size {
            return Err(GtError::InvalidLayout(format!(
                "processor grid {}x{}x{} does not match communicator size {size}",
                layout[0], layout[1], layout[2]
            )));
        }
        check_fits(layout, global)?;
        return Ok(layout);
    }

    let candidates = |d: usize| -> Vec<usize> {
        match (d < dim, requested[d]) {
            (false, _) => vec![1],
            (true, Some(c)) => vec![c],
            (true, None) => (1..=size).filter(|c| size % c == 0).collect(),
        }
    };
    let mut best: Option<([usize; 3], usize)> = None;
    for m in candidates(0) {
        for n in candidates(1) {
            for p in candidates(2) {
                let layout = [m, n, p];
                if m * n * p != size || check_fits(layout, global).is_err() {
                    continue;
                }
                let cost = ghost_surface(layout, global, dim);
                let better = match best {
                    None => true,
                    Some((prev, prev_cost)) => {
                        cost < prev_cost || (cost == prev_cost && (m, n) > (prev[0], prev[1]))
                    }
                };
                if better {
                    best = Some((layout, cost));
                }
            }
        }
    }
    best.map(|(layout, _)| layout).ok_or_else(|| {
        GtError::InvalidLayout(format!(
            "no processor grid for {size} ranks fits a {}x{}x{} array",
            global[0], global[1], global[2]
        ))
    })
}

fn check_fits(layout: [usize; 3], global: [usize; 3]) -> Result<(), GtError> {
    for d in 0..3 {
        if layout[d] == 0 || layout[d] > global[d] {
            return Err(GtError::InvalidLayout(format!(
                "dimension {d}: {} processes for extent {}",
                layout[d], global[d]
            )));
        }
    }
    Ok(())
}

// Face area of the largest block, summed over the active dimensions.
fn ghost_surface(layout: [usize; 3], global: [usize; 3], dim: usize) -> usize {
    let local: Vec<usize> = (0..dim).map(|d| global[d].div_ceil(layout[d])).collect();
    (0..dim)
        .map(|d| (0..dim).filter(|&e| e != d).map(|e| local[e]).product::<usize>())
        .sum()
}
