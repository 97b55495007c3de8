//! Benchmark workloads for the region runtime.
//!
//! Built as a cdylib so the benchmarker binary can load it with the C ABI
//! entry points below, and as a plain rlib so the workloads double as
//! integration tests.
//!
//! `run_benchmark(kind, argc, argv)` picks the workload from the first
//! passthrough argument (`tree`, `gol` or `churn`) with optional numeric
//! parameters after it. `install_gc_callback` routes this library's GC
//! measurements to the host process; the two sides do not share a runtime,
//! so the sink must cross the boundary as a C function pointer.

use std::ffi::{c_char, CStr};
use std::panic::{self, AssertUnwindSafe};

use revier::RegionKind;

pub mod churn;
pub mod gol;
pub mod tree;

/// Measurement callback crossing the cdylib boundary:
/// `(duration_ns, region_kind, bytes_before, object_count_before)`.
pub type RawGcCallback = extern "C" fn(u64, u32, usize, usize);

#[unsafe(no_mangle)]
pub extern "C" fn install_gc_callback(callback: Option<RawGcCallback>) {
    match callback {
        Some(callback) => {
            revier::set_gc_callback(Some(Box::new(
                move |ns, kind, bytes, objects| {
                    callback(ns, kind.as_u32(), bytes, objects);
                },
            )));
        }
        None => {
            revier::take_gc_callback();
        }
    }
}

/// Entry point resolved by the benchmarker. Returns 0 on success, 1 on bad
/// arguments or a workload failure.
///
/// # Safety
///
/// `argv` must point to `argc` valid C strings (the harness passes its own
/// argument vector through).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn run_benchmark(
    kind: u32,
    argc: i32,
    argv: *const *const c_char,
) -> i32 {
    let Some(kind) = RegionKind::from_u32(kind) else {
        eprintln!("run_benchmark: unknown region kind {kind}");
        return 1;
    };
    let mut args = Vec::new();
    for i in 0..argc {
        // SAFETY: per contract.
        let arg = unsafe { CStr::from_ptr(*argv.offset(i as isize)) };
        args.push(arg.to_string_lossy().into_owned());
    }
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        dispatch(kind, &args)
    }));
    match result {
        Ok(code) => code,
        Err(_) => {
            eprintln!("run_benchmark: workload panicked");
            1
        }
    }
}

fn numeric_arg<T: std::str::FromStr>(args: &[String], index: usize, default: T) -> T {
    args.get(index)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn dispatch(kind: RegionKind, args: &[String]) -> i32 {
    // args[0] is the library path the harness was given.
    let workload = args.get(1).map(String::as_str).unwrap_or("tree");
    match workload {
        "tree" => {
            let depth = numeric_arg(args, 2, 10u32);
            let transforms = numeric_arg(args, 3, 5usize);
            tree::run(kind, depth, transforms);
            0
        }
        "gol" => {
            let size = numeric_arg(args, 2, 8usize);
            let generations = numeric_arg(args, 3, 10usize);
            gol::run(kind, size, generations);
            0
        }
        "churn" => {
            let nodes = numeric_arg(args, 2, 12usize);
            let mutations = numeric_arg(args, 3, 1000usize);
            let seed = numeric_arg(args, 4, 12345u64);
            churn::run(kind, nodes, mutations, seed);
            0
        }
        other => {
            eprintln!("run_benchmark: unknown workload '{other}'");
            1
        }
    }
}
