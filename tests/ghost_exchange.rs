// Ghost exchange across several ranks, each running on its own thread.

use std::sync::Arc;
use std::thread;

use gridtao::{
    Comm, DaBuilder, DistributedArray, GtError, InsertMode, Periodic, StencilType, ThreadComm,
};

const SENTINEL: f64 = -1.0;

fn run_ranks<T, F>(size: usize, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(Arc<dyn Comm>) -> T + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let handles: Vec<_> = ThreadComm::universe(size)
        .into_iter()
        .map(|comm| {
            let f = Arc::clone(&f);
            thread::spawn(move || f(Arc::new(comm)))
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

// Value stored for component `c` of the node with natural index `n`.
fn field(n: usize, c: usize) -> f64 {
    (10 * n + c) as f64
}

// Global piece filled from `field`.
fn fill_global(da: &DistributedArray) -> Vec<f64> {
    let (start, extent) = da.corners();
    let dof = da.dof();
    let global_dims = da.info().global;
    let mut g = da.create_global_vector();
    for k in start[2]..start[2] + extent[2] {
        for j in start[1]..start[1] + extent[1] {
            for i in start[0]..start[0] + extent[0] {
                let n = i + j * global_dims[0] + k * global_dims[0] * global_dims[1];
                for c in 0..dof {
                    g[da.global_offset(i, j, k, c).unwrap()] = field(n, c);
                }
            }
        }
    }
    g
}

// Check every ghosted node against the map: mapped nodes hold the field, unmapped ones
// the sentinel. `skip` marks nodes that may legitimately keep the sentinel.
fn check_local(da: &DistributedArray, local: &[f64], skip: impl Fn([isize; 3]) -> bool) {
    let (gs, ge) = da.ghost_corners();
    let dof = da.dof();
    let map = da.local_to_global_map();
    let mut node = 0;
    for k in gs[2]..gs[2] + ge[2] as isize {
        for j in gs[1]..gs[1] + ge[1] as isize {
            for i in gs[0]..gs[0] + ge[0] as isize {
                for c in 0..dof {
                    let got = local[node * dof + c];
                    match map[node] {
                        _ if skip([i, j, k]) => assert_eq!(got, SENTINEL, "({i},{j},{k})"),
                        Some(n) => assert_eq!(got, field(n, c), "({i},{j},{k}) comp {c}"),
                        None => assert_eq!(got, SENTINEL, "({i},{j},{k}) is outside the domain"),
                    }
                }
                node += 1;
            }
        }
    }
}

fn is_corner(da: &DistributedArray, p: [isize; 3]) -> bool {
    let (start, extent) = da.corners();
    (0..3)
        .filter(|&d| p[d] < start[d] as isize || p[d] >= (start[d] + extent[d]) as isize)
        .count()
        > 1
}

#[test]
fn one_dimensional_round_trip() {
    let results = run_ranks(3, |comm| {
        let da = DistributedArray::create_1d(comm, false, 10, 1, 2).unwrap();
        let global = fill_global(&da);
        let mut local = vec![SENTINEL; da.ghosted_size()];
        let pending = da.global_to_local_begin(&global, InsertMode::Insert).unwrap();
        da.global_to_local_end(pending, &mut local).unwrap();
        check_local(&da, &local, |_| false);

        let mut back = vec![0.0; global.len()];
        da.local_to_global(&local, &mut back, InsertMode::Insert).unwrap();
        assert_eq!(back, global);
        da.corners()
    });
    let starts: Vec<_> = results.iter().map(|(s, e)| (s[0], e[0])).collect();
    assert_eq!(starts, vec![(0, 4), (4, 3), (7, 3)]);
}

#[test]
fn boundary_ghosts_stay_untouched() {
    run_ranks(2, |comm| {
        let da = DistributedArray::create_1d(comm.clone(), false, 6, 1, 1).unwrap();
        let global = fill_global(&da);
        let mut local = vec![SENTINEL; da.ghosted_size()];
        da.global_to_local(&global, &mut local, InsertMode::Insert).unwrap();
        if comm.rank() == 0 {
            assert_eq!(da.local_to_global_map()[0], None);
            assert_eq!(local[0], SENTINEL);
            assert_eq!(local[4], field(3, 0));
        } else {
            assert_eq!(da.local_to_global_map()[4], None);
            assert_eq!(local[4], SENTINEL);
            assert_eq!(local[0], field(2, 0));
        }
    });
}

#[test]
fn periodic_map_wraps_both_ends() {
    run_ranks(2, |comm| {
        let da = DistributedArray::create_1d(comm.clone(), true, 8, 1, 1).unwrap();
        let map = da.local_to_global_map();
        if comm.rank() == 0 {
            // ghost at x = -1
            assert_eq!(map[0], Some(7));
        } else {
            // ghost at x = 8
            assert_eq!(map[map.len() - 1], Some(0));
        }
        let global = fill_global(&da);
        let mut local = vec![SENTINEL; da.ghosted_size()];
        da.global_to_local(&global, &mut local, InsertMode::Insert).unwrap();
        check_local(&da, &local, |_| false);
    });
}

#[test]
fn box_and_star_stencils_in_two_dimensions() {
    for stencil in [StencilType::Box, StencilType::Star] {
        run_ranks(4, move |comm| {
            let da = DaBuilder::new(comm)
                .sizes(&[6, 5])
                .dof(2)
                .stencil_width(1)
                .stencil_type(stencil)
                .build()
                .unwrap();
            assert_eq!(da.info().procs, [2, 2, 1]);
            let global = fill_global(&da);
            let mut local = vec![SENTINEL; da.ghosted_size()];
            let pending = da.global_to_local_begin(&global, InsertMode::Insert).unwrap();
            da.global_to_local_end(pending, &mut local).unwrap();
            check_local(&da, &local, |p| stencil == StencilType::Star && is_corner(&da, p));
        });
    }
}

#[test]
fn three_dimensional_periodic_box() {
    run_ranks(8, |comm| {
        let da = DaBuilder::new(comm)
            .sizes(&[4, 4, 4])
            .stencil_width(1)
            .periodic(Periodic::X | Periodic::Z)
            .build()
            .unwrap();
        assert_eq!(da.info().procs, [2, 2, 2]);
        let global = fill_global(&da);
        let mut local = vec![SENTINEL; da.ghosted_size()];
        da.global_to_local(&global, &mut local, InsertMode::Insert).unwrap();
        check_local(&da, &local, |_| false);
    });
}

#[test]
fn add_mode_accumulates() {
    run_ranks(2, |comm| {
        let da = DistributedArray::create_1d(comm, true, 6, 1, 1).unwrap();
        let global = fill_global(&da);
        let mut local = vec![1.0; da.ghosted_size()];
        da.global_to_local(&global, &mut local, InsertMode::Add).unwrap();
        for (n, v) in da.local_to_global_map().iter().zip(&local) {
            let expected = n.map_or(1.0, |n| 1.0 + field(n, 0));
            assert_eq!(*v, expected);
        }
    });
}

#[test]
fn local_to_local_refreshes_in_place() {
    run_ranks(3, |comm| {
        let da = DaBuilder::new(comm)
            .sizes(&[9, 4])
            .processors(&[3, 1])
            .stencil_width(2)
            .periodic(Periodic::X)
            .build()
            .unwrap();
        // owned values only, ghosts at the sentinel
        let global = fill_global(&da);
        let mut local = vec![SENTINEL; da.ghosted_size()];
        let (start, extent) = da.corners();
        for j in start[1]..start[1] + extent[1] {
            for i in start[0]..start[0] + extent[0] {
                let l = da.local_offset(i as isize, j as isize, 0, 0).unwrap();
                local[l] = global[da.global_offset(i, j, 0, 0).unwrap()];
            }
        }
        let pending = da.local_to_local_begin(&local, InsertMode::Insert).unwrap();
        da.local_to_local_end(pending, &mut local).unwrap();
        check_local(&da, &local, |_| false);
    });
}

#[test]
fn plans_pair_across_ranks() {
    let counts = run_ranks(4, |comm| {
        let da = DaBuilder::new(comm)
            .sizes(&[7, 7])
            .dof(3)
            .stencil_width(2)
            .periodic(Periodic::Y)
            .build()
            .unwrap();
        let plan = da.global_to_local_plan();
        let sends: Vec<usize> = (0..4).map(|p| plan.send_count(p)).collect();
        let recvs: Vec<usize> = (0..4).map(|p| plan.recv_count(p)).collect();
        (sends, recvs)
    });
    for a in 0..4 {
        for b in 0..4 {
            assert_eq!(counts[a].0[b], counts[b].1[a], "rank {a} -> rank {b}");
        }
    }
}

#[test]
fn natural_and_blocked_orderings_agree() {
    run_ranks(4, |comm| {
        let da = DaBuilder::new(comm).sizes(&[4, 4]).build().unwrap();
        let (start, extent) = da.corners();
        for j in start[1]..start[1] + extent[1] {
            for i in start[0]..start[0] + extent[0] {
                let natural = i + 4 * j;
                let blocked = da.natural_to_global(natural).unwrap();
                assert_eq!(blocked, da.base() + da.global_offset(i, j, 0, 0).unwrap());
            }
        }
        let global = fill_global(&da);
        for (n, v) in da.global_to_natural(&global).unwrap() {
            assert_eq!(v, field(n, 0));
        }
    });
}

#[test]
fn mismatched_vectors_are_rejected() {
    run_ranks(2, |comm| {
        let da = DistributedArray::create_1d(comm, false, 8, 1, 1).unwrap();
        let short = vec![0.0; da.local_size() - 1];
        assert!(matches!(
            da.global_to_local_begin(&short, InsertMode::Insert),
            Err(GtError::VectorSize { .. })
        ));
        let mut local = da.create_local_vector();
        let mut global = da.create_global_vector();
        global.push(0.0);
        assert!(matches!(
            da.local_to_global(&local, &mut global, InsertMode::Insert),
            Err(GtError::VectorSize { .. })
        ));
        // keep both ranks in step before the next collective call
        let g = da.create_global_vector();
        da.global_to_local(&g, &mut local, InsertMode::Insert).unwrap();
    });
}

// Ghosts of `local` must hold `scale` times the field wherever the map resolves.
fn check_scaled(da: &DistributedArray, local: &[f64], scale: f64) {
    for (node, n) in da.local_to_global_map().iter().enumerate() {
        match n {
            Some(n) => assert_eq!(local[node], scale * field(*n, 0), "node {node}"),
            None => assert_eq!(local[node], SENTINEL, "node {node}"),
        }
    }
}

#[test]
fn overlapping_transfers_keep_their_own_data() {
    run_ranks(2, |comm| {
        let da = DistributedArray::create_1d(comm, false, 8, 1, 1).unwrap();
        let ga = fill_global(&da);
        let gb: Vec<f64> = ga.iter().map(|v| 2.0 * v).collect();
        let mut la = vec![SENTINEL; da.ghosted_size()];
        let mut lb = vec![SENTINEL; da.ghosted_size()];
        let pa = da.global_to_local_begin(&ga, InsertMode::Insert).unwrap();
        let pb = da.global_to_local_begin(&gb, InsertMode::Insert).unwrap();
        da.global_to_local_end(pb, &mut lb).unwrap();
        da.global_to_local_end(pa, &mut la).unwrap();
        check_scaled(&da, &la, 1.0);
        check_scaled(&da, &lb, 2.0);
    });
}

#[test]
fn arrays_sharing_a_communicator_do_not_collide() {
    run_ranks(3, |comm| {
        let coarse = DistributedArray::create_1d(comm.clone(), true, 6, 1, 1).unwrap();
        let fine = DistributedArray::create_1d(comm, true, 12, 1, 2).unwrap();
        let gc = fill_global(&coarse);
        let gf: Vec<f64> = fill_global(&fine).iter().map(|v| 3.0 * v).collect();
        let mut lc = vec![SENTINEL; coarse.ghosted_size()];
        let mut lf = vec![SENTINEL; fine.ghosted_size()];
        let pc = coarse.global_to_local_begin(&gc, InsertMode::Insert).unwrap();
        let pf = fine.global_to_local_begin(&gf, InsertMode::Insert).unwrap();
        fine.global_to_local_end(pf, &mut lf).unwrap();
        coarse.global_to_local_end(pc, &mut lc).unwrap();
        check_scaled(&coarse, &lc, 1.0);
        check_scaled(&fine, &lf, 3.0);
    });
}

#[test]
fn begin_posts_before_the_peer_ends() {
    // rank 1 only reaches its end after rank 0 has finished, so rank 0's end can only
    // complete if rank 1's begin already sent its data
    let gate = Arc::new(std::sync::Barrier::new(2));
    run_ranks(2, move |comm| {
        let da = DistributedArray::create_1d(comm.clone(), false, 6, 1, 1).unwrap();
        let global = fill_global(&da);
        let mut local = vec![SENTINEL; da.ghosted_size()];
        let pending = da.global_to_local_begin(&global, InsertMode::Insert).unwrap();
        if comm.rank() == 0 {
            da.global_to_local_end(pending, &mut local).unwrap();
            gate.wait();
        } else {
            gate.wait();
            da.global_to_local_end(pending, &mut local).unwrap();
        }
        check_local(&da, &local, |_| false);
    });
}
