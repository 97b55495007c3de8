//! Tree transformation workload.
//!
//! Builds an immutable binary tree, then repeatedly produces a transformed
//! copy and discards the old tree. Arenas keep everything until release,
//! the tracing collector sweeps the dead tree, and the Rc strategy pays
//! incref/decref on every node while construction churns the candidate
//! buffer.

use revier::{
    self as rt, Descriptor, DescriptorFlags, Obj, Object, ObjectStack,
    OpenMode, RegionKind,
};

#[repr(C)]
pub struct TreeNode {
    left: *mut Object,
    right: *mut Object,
    value: i64,
}

unsafe fn trace_tree_node(o: Obj, stack: &mut ObjectStack) {
    // SAFETY: payload is a TreeNode by descriptor contract.
    unsafe {
        let node = o.payload_as::<TreeNode>();
        for field in [(*node).left, (*node).right] {
            if !field.is_null() {
                stack.push(Obj::from_raw(field));
            }
        }
    }
}

pub static TREE_NODE: Descriptor = Descriptor {
    size: size_of::<TreeNode>(),
    align: align_of::<TreeNode>(),
    trace: trace_tree_node,
    finalize: None,
    flags: DescriptorFlags::empty(),
};

fn set_left(o: Obj, v: Option<Obj>) {
    // SAFETY: payload is a TreeNode.
    unsafe {
        (*o.payload_as::<TreeNode>()).left =
            v.map_or(std::ptr::null_mut(), |x| x.as_ptr());
    }
}

fn set_right(o: Obj, v: Option<Obj>) {
    // SAFETY: as above.
    unsafe {
        (*o.payload_as::<TreeNode>()).right =
            v.map_or(std::ptr::null_mut(), |x| x.as_ptr());
    }
}

fn left(o: Obj) -> Option<Obj> {
    // SAFETY: as above.
    unsafe {
        let p = (*o.payload_as::<TreeNode>()).left;
        (!p.is_null()).then(|| Obj::from_raw(p))
    }
}

fn right(o: Obj) -> Option<Obj> {
    // SAFETY: as above.
    unsafe {
        let p = (*o.payload_as::<TreeNode>()).right;
        (!p.is_null()).then(|| Obj::from_raw(p))
    }
}

fn value(o: Obj) -> i64 {
    // SAFETY: as above.
    unsafe { (*o.payload_as::<TreeNode>()).value }
}

fn set_value(o: Obj, v: i64) {
    // SAFETY: as above.
    unsafe { (*o.payload_as::<TreeNode>()).value = v };
}

/// Models the reference traffic of a field assignment in an RC language:
/// the store increments, the dying local decrements. Net zero, but the
/// decrement pushes the node onto the cycle-candidate buffer.
fn transfer_ref(kind: RegionKind, o: Option<Obj>) {
    if kind == RegionKind::Rc {
        if let Some(o) = o {
            rt::incref(o);
            rt::decref(o);
        }
    }
}

fn build_tree(kind: RegionKind, depth: u32, start_value: i64) -> Option<Obj> {
    if depth == 0 {
        return None;
    }
    let node = rt::alloc(&TREE_NODE);
    set_value(node, start_value);
    let l = build_tree(kind, depth - 1, start_value * 2 + 1);
    let r = build_tree(kind, depth - 1, start_value * 2 + 2);
    set_left(node, l);
    set_right(node, r);
    transfer_ref(kind, l);
    transfer_ref(kind, r);
    Some(node)
}

fn transform_tree(kind: RegionKind, old: Option<Obj>, delta: i64) -> Option<Obj> {
    let old = old?;
    let node = rt::alloc(&TREE_NODE);
    set_value(node, value(old) + delta);
    let l = transform_tree(kind, left(old), delta);
    let r = transform_tree(kind, right(old), delta);
    set_left(node, l);
    set_right(node, r);
    transfer_ref(kind, l);
    transfer_ref(kind, r);
    Some(node)
}

fn discard_tree(kind: RegionKind, root: Obj) {
    // Rc cascades through the whole tree; Trace and Arena wait for their
    // collection (or release).
    if kind == RegionKind::Rc {
        rt::decref(root);
    }
}

pub fn count_nodes(root: Option<Obj>) -> usize {
    match root {
        None => 0,
        Some(o) => 1 + count_nodes(left(o)) + count_nodes(right(o)),
    }
}

pub fn sum_values(root: Option<Obj>) -> i64 {
    match root {
        None => 0,
        Some(o) => value(o) + sum_values(left(o)) + sum_values(right(o)),
    }
}

/// Runs `transforms` immutable rewrites of a depth-`depth` tree.
pub fn run(kind: RegionKind, depth: u32, transforms: usize) {
    let entry = rt::create_region(kind, &TREE_NODE);
    {
        let guard = rt::open_region(entry, OpenMode::Work).unwrap();

        let mut current = build_tree(kind, depth, 0).expect("depth > 0");
        set_left(entry, Some(current));
        let node_count = count_nodes(Some(current));
        tracing::info!(target: "workload", node_count, "tree built");

        for round in 0..transforms {
            let next =
                transform_tree(kind, Some(current), 1).expect("depth > 0");
            discard_tree(kind, current);
            current = next;
            set_left(entry, Some(current));

            rt::region_collect();

            if kind != RegionKind::Arena {
                let expected = count_nodes(Some(current)) + 1;
                assert_eq!(
                    rt::debug_size(),
                    expected,
                    "live set after transform {round}"
                );
            }
        }
        guard.close();
    }
    rt::release(entry);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_10_keeps_1024_objects_live_trace() {
        // 1023 tree nodes plus the region root after every transform.
        run(RegionKind::Trace, 10, 5);
    }

    #[test]
    fn depth_10_keeps_1024_objects_live_rc() {
        run(RegionKind::Rc, 10, 5);
    }

    #[test]
    fn arena_variant_smoke() {
        run(RegionKind::Arena, 6, 3);
    }

    #[test]
    fn transform_shifts_every_value() {
        let entry = rt::create_region(RegionKind::Trace, &TREE_NODE);
        {
            let guard = rt::open_region(entry, OpenMode::Work).unwrap();
            let tree = build_tree(RegionKind::Trace, 4, 0);
            let sum = sum_values(tree);
            let shifted = transform_tree(RegionKind::Trace, tree, 1);
            assert_eq!(
                sum_values(shifted),
                sum + count_nodes(shifted) as i64
            );
            guard.close();
        }
        rt::release(entry);
    }
}
