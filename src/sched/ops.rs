/// The pluggable capability a concrete scheduler (fixed-priority, EDF, ...)
/// supplies to the CORE (spec.md §4.4, §6). The CORE is generic over this
/// trait and never hard-codes a ready-queue data structure (Non-goal (a)).
///
/// This bundles the ready-set contract of §4.4 (`get_highest_ready`,
/// `extract`, `insert_ready`, `insert_scheduled`, the two moves, `order`)
/// with the thread-layer accessors of §6 (`is_executing`, `current_cpu`,
/// `set_current_cpu`) into one trait, since a single concrete scheduler
/// module naturally owns both — the same shape as `valibali-cluu`'s
/// `Scheduler`/`KernelSchedCtx` split, collapsed to one trait because the
/// CORE (unlike that repo's policy/mechanism boundary) is the only caller.
use super::node::ThreadHandle;
use super::processor::CpuIndex;

pub trait SchedulerOps<Id: ThreadHandle> {
    /// Strict total order: `order(a, b)` is true iff `a` is strictly
    /// higher priority than `b` (ties broken by FIFO/LIFO as the concrete
    /// scheduler chooses). Must be antisymmetric: never true in both
    /// directions for the same pair (P5).
    fn order(&self, a: Id, b: Id) -> bool;

    /// The strictly highest-priority READY thread, without removing it.
    fn get_highest_ready(&self) -> Option<Id>;

    /// The tail of the scheduled set (lowest scheduling priority among
    /// currently scheduled threads), or `None` if the scheduled set is
    /// momentarily empty (nested-interrupt edge case, spec.md §4.3).
    fn lowest_scheduled(&self) -> Option<Id>;

    /// Physically remove `id` from whichever set currently holds it. Does
    /// *not* change `id`'s scheduler-node state — `SchedulerCore::extract`
    /// owns that transition (see DESIGN.md's Open Question resolution #3).
    fn remove(&mut self, id: Id);

    fn insert_ready(&mut self, id: Id);
    fn insert_scheduled(&mut self, id: Id);

    /// Composition: `id` is known to be in the ready set; move it to the
    /// scheduled set, preserving priority order.
    fn move_ready_to_scheduled(&mut self, id: Id);
    /// Composition: `id` is known to be in the scheduled set; move it to
    /// the ready set, preserving priority order.
    fn move_scheduled_to_ready(&mut self, id: Id);

    /// Whether `id` is the thread currently executing on some processor
    /// (spec.md §4.2 step 2).
    fn is_executing(&self, id: Id) -> bool;
    /// The processor `id` is currently bound to, if any.
    fn current_cpu(&self, id: Id) -> Option<CpuIndex>;
    /// Rebind `id` to `cpu` (the thread layer's `Thread_Set_CPU`, §6).
    fn set_current_cpu(&mut self, id: Id, cpu: CpuIndex);
}
