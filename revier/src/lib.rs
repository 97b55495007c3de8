//! Region-based memory management runtime.
//!
//! Every object belongs to exactly one region, and every region collects
//! with one of three interchangeable strategies: an arena (bump allocation,
//! bulk release), a tracing mark-sweep collector, or deferred reference
//! counting with a trial-deletion cycle detector. Regions are named by a
//! single entry object, opened onto a per-worker context stack, and share
//! a Closed/Open/Collecting state machine that coordinates mutator work
//! with asynchronous GC tasks on an external scheduler.
//!
//! ```no_run
//! use revier::{self as rt, RegionKind, OpenMode};
//! # static DESC: revier::Descriptor = revier::Descriptor {
//! #     size: 0, align: 8, trace: revier::trace_nothing,
//! #     finalize: None, flags: revier::DescriptorFlags::empty(),
//! # };
//!
//! let entry = rt::create_region(RegionKind::Trace, &DESC);
//! {
//!     let guard = rt::open_region(entry, OpenMode::Work).unwrap();
//!     let _obj = rt::alloc(&DESC);
//!     rt::region_collect();
//!     guard.close();
//! }
//! rt::release(entry);
//! ```

mod api;
mod arena;
mod context;
mod descriptor;
mod external;
mod freeze;
mod heap;
mod object;
mod rc;
mod region;
mod remembered;
mod scheduler;
mod settings;
mod trace;

#[cfg(test)]
mod testutil;

pub use api::{
    alloc, create_external_reference, create_region, create_region_with,
    debug_allocation_totals, debug_memory_used, debug_size, decref, freeze,
    incref, is_region_ref, merge, open_region, region_collect, release,
    remember_external, set_entry_point, set_gc_callback, set_task_scheduler,
    take_gc_callback, use_external_reference, OpenMode, RegionGuard,
};
pub use context::GcSink;
pub use descriptor::{
    trace_nothing, Descriptor, DescriptorFlags, FinalizeFn, TraceFn,
};
pub use external::ExternalRef;
pub use object::{Obj, Object, ObjectStack};
pub use region::{Region, RegionBase, RegionKind, RegionState};
pub use scheduler::{Task, TaskScheduler, WorkerPool};
pub use settings::RegionSettings;
