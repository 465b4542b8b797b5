/// The SMP scheduler core: a thread's node-state machine, per-processor
/// heir bookkeeping, and the primitive operations (`enqueue`, `extract`,
/// `schedule`, `block`, `start_idle`) that keep "the N highest-priority
/// runnable threads run on the N processors" true at every call boundary.
///
/// This module is deliberately ignorant of priorities, ready-queue data
/// structures, threads, or CPUs beyond an opaque `Id`/`CpuIndex` — those
/// are supplied by a `SchedulerOps<Id>` implementation (see `simple` for a
/// reference one) and an `InterProcessorInterrupt` sender. `task::scheduler`
/// is the concrete, single-processor consumer shipped with this kernel.
pub mod core_ops;
pub mod node;
pub mod ops;
pub mod processor;
pub mod simple;

pub use core_ops::SchedulerCore;
pub use node::{NodeState, SchedulerNode, ThreadHandle};
pub use ops::SchedulerOps;
pub use processor::{CpuIndex, InterProcessorInterrupt, ProcessorSet};
pub use simple::{SimpleScheduler, TieBreak};
