//! Game of Life workload.
//!
//! Every generation allocates fresh cell objects and drops the previous
//! generation, so the live set stays small while the region churns. The
//! grid is toroidal and seeded with the R-pentomino.

use revier::{
    self as rt, Descriptor, DescriptorFlags, Obj, Object, ObjectStack,
    OpenMode, RegionKind,
};

pub const MAX_GRID: usize = 32 * 32;

#[repr(C)]
struct SimRoot {
    cells: [*mut Object; MAX_GRID],
}

unsafe fn trace_sim_root(o: Obj, stack: &mut ObjectStack) {
    // SAFETY: payload is a SimRoot by descriptor contract.
    unsafe {
        let root = o.payload_as::<SimRoot>();
        for &cell in (*root).cells.iter() {
            if !cell.is_null() {
                stack.push(Obj::from_raw(cell));
            }
        }
    }
}

static SIM_ROOT: Descriptor = Descriptor {
    size: size_of::<SimRoot>(),
    align: align_of::<SimRoot>(),
    trace: trace_sim_root,
    finalize: None,
    flags: DescriptorFlags::empty(),
};

#[repr(C)]
struct CellPayload {
    x: u32,
    y: u32,
}

// Cells reference nothing; they can never sit on a cycle.
static CELL: Descriptor = Descriptor {
    size: size_of::<CellPayload>(),
    align: align_of::<CellPayload>(),
    trace: rt::trace_nothing,
    finalize: None,
    flags: DescriptorFlags::ACYCLIC,
};

fn write_cells(root: Obj, grid: &[Option<Obj>]) {
    // SAFETY: payload is a SimRoot.
    unsafe {
        let cells = &mut (*root.payload_as::<SimRoot>()).cells;
        cells.fill(std::ptr::null_mut());
        for (slot, cell) in cells.iter_mut().zip(grid.iter()) {
            if let Some(c) = cell {
                *slot = c.as_ptr();
            }
        }
    }
}

fn count_neighbors(grid: &[Option<Obj>], size: usize, x: usize, y: usize) -> usize {
    let mut count = 0;
    for dy in [size - 1, 0, 1] {
        for dx in [size - 1, 0, 1] {
            if dx == 0 && dy == 0 {
                continue;
            }
            let nx = (x + dx) % size;
            let ny = (y + dy) % size;
            if grid[ny * size + nx].is_some() {
                count += 1;
            }
        }
    }
    count
}

fn new_cell(x: usize, y: usize) -> Obj {
    let cell = rt::alloc(&CELL);
    // SAFETY: payload is a CellPayload.
    unsafe {
        (*cell.payload_as::<CellPayload>()).x = x as u32;
        (*cell.payload_as::<CellPayload>()).y = y as u32;
    }
    cell
}

/// Runs `generations` steps on a `size` x `size` toroidal grid.
pub fn run(kind: RegionKind, size: usize, generations: usize) {
    assert!(size * size <= MAX_GRID, "grid too large for the sim root");

    let entry = rt::create_region(kind, &SIM_ROOT);
    {
        let guard = rt::open_region(entry, OpenMode::Work).unwrap();

        let mut current: Vec<Option<Obj>> = vec![None; size * size];
        let mut next: Vec<Option<Obj>> = vec![None; size * size];

        // R-pentomino seed in the middle of the grid.
        let cx = size / 2;
        let cy = size / 2;
        for (x, y) in [
            (cx + 1, cy),
            (cx + 2, cy),
            (cx, cy + 1),
            (cx + 1, cy + 1),
            (cx + 1, cy + 2),
        ] {
            if x < size && y < size {
                current[y * size + x] = Some(new_cell(x, y));
            }
        }
        write_cells(entry, &current);
        assert_eq!(rt::debug_size(), 6, "five seed cells plus the sim root");

        for generation in 0..generations {
            for y in 0..size {
                for x in 0..size {
                    let neighbors = count_neighbors(&current, size, x, y);
                    let alive = current[y * size + x].is_some();
                    next[y * size + x] = match (alive, neighbors) {
                        (true, 2) | (true, 3) | (false, 3) => {
                            Some(new_cell(x, y))
                        }
                        _ => None,
                    };
                }
            }

            // The old generation dies; under Rc each cell drops its single
            // reference and frees eagerly.
            if kind == RegionKind::Rc {
                for old in current.iter().flatten() {
                    rt::decref(*old);
                }
            }
            std::mem::swap(&mut current, &mut next);
            next.fill(None);
            write_cells(entry, &current);

            if kind != RegionKind::Arena {
                rt::region_collect();
                let alive = current.iter().flatten().count();
                assert_eq!(
                    rt::debug_size(),
                    alive + 1,
                    "live set after generation {generation}"
                );
            }
        }
        guard.close();
    }
    rt::release(entry);
}
