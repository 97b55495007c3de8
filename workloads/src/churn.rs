//! Pointer churn workload.
//!
//! A chain of graph nodes hangs off the region root; random mutations add,
//! retarget and remove edges until the graph collapses onto the root or
//! the mutation budget runs out. Dropped subgraphs and cycles become
//! garbage for the region's collector. When the graph collapses early the
//! region is released and rebuilt until the budget is spent.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use revier::{
    self as rt, Descriptor, DescriptorFlags, Obj, Object, ObjectStack,
    OpenMode, RegionKind,
};

pub const MAX_OUT_EDGES: usize = 4;

#[repr(C)]
struct GraphNode {
    edges: [*mut Object; MAX_OUT_EDGES],
    id: u64,
}

unsafe fn trace_graph_node(o: Obj, stack: &mut ObjectStack) {
    // SAFETY: payload is a GraphNode by descriptor contract.
    unsafe {
        let node = o.payload_as::<GraphNode>();
        for &edge in (*node).edges.iter() {
            if !edge.is_null() {
                stack.push(Obj::from_raw(edge));
            }
        }
    }
}

static GRAPH_NODE: Descriptor = Descriptor {
    size: size_of::<GraphNode>(),
    align: align_of::<GraphNode>(),
    trace: trace_graph_node,
    finalize: None,
    flags: DescriptorFlags::empty(),
};

fn edge(o: Obj, index: usize) -> Option<Obj> {
    // SAFETY: payload is a GraphNode.
    unsafe {
        let p = (*o.payload_as::<GraphNode>()).edges[index];
        if p.is_null() {
            None
        } else {
            Some(Obj::from_raw(p))
        }
    }
}

fn set_edge(o: Obj, index: usize, v: Option<Obj>) {
    // SAFETY: as above.
    unsafe {
        (*o.payload_as::<GraphNode>()).edges[index] =
            v.map_or(std::ptr::null_mut(), |x| x.as_ptr());
    }
}

fn set_id(o: Obj, id: u64) {
    // SAFETY: as above.
    unsafe { (*o.payload_as::<GraphNode>()).id = id };
}

/// Depth-first walk collecting every node reachable from `root`.
pub fn find_reachable(root: Obj) -> Vec<Obj> {
    let mut reachable: Vec<Obj> = Vec::new();
    let mut work = vec![root];
    while let Some(o) = work.pop() {
        if reachable.contains(&o) {
            continue;
        }
        reachable.push(o);
        for i in 0..MAX_OUT_EDGES {
            if let Some(target) = edge(o, i) {
                work.push(target);
            }
        }
    }
    reachable
}

/// Mutates a `num_nodes` chain graph `num_mutations` times, collecting at
/// a fixed interval, rebuilding the region whenever the graph collapses.
pub fn run(kind: RegionKind, num_nodes: usize, num_mutations: usize, seed: u64) {
    assert!(num_nodes >= 2);
    let gc_interval = (num_mutations / 100).max(1);
    // Distinct stream per strategy, deterministic per seed.
    let mut rng = StdRng::seed_from_u64(seed + kind.as_u32() as u64 * 10_000);
    let mut remaining = num_mutations;

    while remaining > 0 {
        let entry = rt::create_region(kind, &GRAPH_NODE);
        set_id(entry, 0);
        {
            let guard = rt::open_region(entry, OpenMode::Work).unwrap();
            let mut prev = entry;
            for i in 1..num_nodes {
                let node = rt::alloc(&GRAPH_NODE);
                set_id(node, i as u64);
                set_edge(prev, 0, Some(node));
                prev = node;
            }
            assert_eq!(rt::debug_size(), num_nodes);

            while remaining > 0 {
                let reachable = find_reachable(entry);
                if reachable.len() == 1 {
                    tracing::debug!(target: "workload", "graph collapsed to the root");
                    break;
                }

                let src = reachable[rng.random_range(0..reachable.len())];
                // Never pick the root as a destination; its count is owned
                // by the region itself.
                let dst = reachable[rng.random_range(1..reachable.len())];
                let edge_idx = rng.random_range(0..MAX_OUT_EDGES);
                let old = edge(src, edge_idx);

                if rng.random_range(0..2) == 0 {
                    // Add or update the edge.
                    set_edge(src, edge_idx, Some(dst));
                    if kind == RegionKind::Rc {
                        rt::incref(dst);
                    }
                    if let Some(old) = old {
                        if kind == RegionKind::Rc {
                            rt::decref(old);
                        }
                    }
                } else if let Some(old) = old {
                    set_edge(src, edge_idx, None);
                    if kind == RegionKind::Rc {
                        rt::decref(old);
                    }
                }

                if remaining % gc_interval == 0 && kind != RegionKind::Arena {
                    rt::region_collect();
                }
                remaining -= 1;
            }

            if kind != RegionKind::Arena {
                rt::region_collect();
                // Nothing unreachable survives a full collection.
                let reachable = find_reachable(entry);
                assert_eq!(rt::debug_size(), reachable.len());
                if kind == RegionKind::Rc {
                    let (allocs, deallocs) = rt::debug_allocation_totals();
                    assert_eq!(
                        (allocs - deallocs) as usize,
                        rt::debug_size(),
                        "allocation accounting must match the live set"
                    );
                }
            }
            guard.close();
        }
        rt::release(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_churn_trace() {
        run(RegionKind::Trace, 12, 1000, 12345);
    }

    #[test]
    fn chain_churn_rc() {
        run(RegionKind::Rc, 12, 1000, 12345);
    }

    #[test]
    fn chain_churn_arena_smoke() {
        run(RegionKind::Arena, 12, 200, 12345);
    }

    #[test]
    fn find_reachable_sees_through_cycles() {
        let entry = rt::create_region(RegionKind::Trace, &GRAPH_NODE);
        let guard = rt::open_region(entry, OpenMode::Work).unwrap();
        let a = rt::alloc(&GRAPH_NODE);
        let b = rt::alloc(&GRAPH_NODE);
        set_edge(entry, 0, Some(a));
        set_edge(a, 0, Some(b));
        set_edge(b, 0, Some(a));
        let reachable = find_reachable(entry);
        assert_eq!(reachable.len(), 3);
        guard.close();
        rt::release(entry);
    }
}
