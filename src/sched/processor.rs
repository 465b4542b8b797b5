/// Per-processor bookkeeping: the heir each processor will switch to, the
/// dispatch-necessary flag, and the fundamental fence that keeps the two
/// consistent for an observer that never takes the scheduler lock.

extern crate alloc;

use alloc::vec::Vec;
use core::sync::atomic::{fence, AtomicBool, AtomicUsize, Ordering};

use super::node::ThreadHandle;

/// Index of a processor within a scheduler instance's `ProcessorSet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CpuIndex(pub usize);

/// Sends an inter-processor interrupt to nudge a remote processor into
/// re-reading its `dispatch_necessary` flag. Supplied by the thread layer
/// (spec.md §6); the single-CPU demo kernel's impl is a no-op.
pub trait InterProcessorInterrupt {
    fn send(&self, cpu: CpuIndex);
}

const NO_HEIR: usize = usize::MAX;

/// One processor's heir pointer and dispatch flag (§3, ProcessorRecord).
/// Both fields are atomics so a remote processor's dispatch fast path can
/// read them without acquiring the scheduler lock.
struct ProcessorRecord {
    heir: AtomicUsize,
    dispatch_necessary: AtomicBool,
}

impl ProcessorRecord {
    fn new() -> Self {
        ProcessorRecord {
            heir: AtomicUsize::new(NO_HEIR),
            dispatch_necessary: AtomicBool::new(false),
        }
    }
}

/// Per-CPU records for every processor of one scheduler instance (§3,
/// ProcessorSet). A scheduler instance may own only a subset of the system's
/// processors; `owns` answers whether a given CPU belongs to this instance,
/// mirroring `_Scheduler_SMP_Is_processor_owned_by_us`.
pub struct ProcessorSet {
    records: Vec<ProcessorRecord>,
}

impl ProcessorSet {
    /// `processor_count` processors, indexed 0..processor_count, all owned
    /// by this instance. (Partitioned multi-instance scheduling, where an
    /// instance owns a strict subset of the system's CPUs, is not modeled
    /// here — out of scope per spec.md's affinity non-goal.)
    pub fn new(processor_count: usize) -> Self {
        let mut records = Vec::with_capacity(processor_count);
        for _ in 0..processor_count {
            records.push(ProcessorRecord::new());
        }
        ProcessorSet { records }
    }

    pub fn processor_count(&self) -> usize {
        self.records.len()
    }

    pub fn owns(&self, cpu: CpuIndex) -> bool {
        cpu.0 < self.records.len()
    }

    /// The thread currently named as `cpu`'s heir, or `None` if the
    /// processor has never been assigned one (should not happen once
    /// `start_idle` has run for every processor).
    pub fn heir<Id: ThreadHandle>(&self, cpu: CpuIndex) -> Option<Id> {
        let raw = self.records[cpu.0].heir.load(Ordering::Acquire);
        if raw == NO_HEIR {
            None
        } else {
            Some(Id::from_index(raw))
        }
    }

    pub fn dispatch_necessary(&self, cpu: CpuIndex) -> bool {
        self.records[cpu.0].dispatch_necessary.load(Ordering::Acquire)
    }

    /// Clears `dispatch_necessary`; called by the dispatcher once it has
    /// acted on a pending heir change. Not used by the CORE itself, but
    /// exposed for the thread layer's dispatch fast path.
    pub fn acknowledge_dispatch(&self, cpu: CpuIndex) {
        self.records[cpu.0].dispatch_necessary.store(false, Ordering::Release);
    }

    /// The fundamental fence (spec.md §4.2 step 4, §5): store the heir,
    /// fence, then store dispatch-necessary — so any observer that sees
    /// `dispatch_necessary == true` is guaranteed to see the updated heir.
    /// Only raises dispatch-necessary on a false->true edge (to avoid
    /// superfluous IPIs), and only sends an IPI when the target processor
    /// is not the calling processor.
    pub fn update_heir<Id: ThreadHandle>(
        &self,
        cpu_self: CpuIndex,
        cpu_for_heir: CpuIndex,
        heir: Id,
        ipi: &impl InterProcessorInterrupt,
    ) {
        let record = &self.records[cpu_for_heir.0];
        record.heir.store(heir.index(), Ordering::Release);

        fence(Ordering::SeqCst);

        let was_clear = record
            .dispatch_necessary
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if was_clear && cpu_for_heir != cpu_self {
            ipi.send(cpu_for_heir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    struct Tid(usize);
    impl ThreadHandle for Tid {
        fn index(&self) -> usize {
            self.0
        }
        fn from_index(index: usize) -> Self {
            Tid(index)
        }
    }

    struct NoopIpi;
    impl InterProcessorInterrupt for NoopIpi {
        fn send(&self, _cpu: CpuIndex) {}
    }

    struct CountingIpi {
        sent: core::cell::Cell<usize>,
    }
    impl InterProcessorInterrupt for CountingIpi {
        fn send(&self, _cpu: CpuIndex) {
            self.sent.set(self.sent.get() + 1);
        }
    }

    #[test]
    fn fresh_set_has_no_heirs() {
        let set = ProcessorSet::new(2);
        assert_eq!(set.heir::<Tid>(CpuIndex(0)), None);
        assert!(!set.dispatch_necessary(CpuIndex(0)));
    }

    #[test]
    fn update_heir_sets_heir_and_dispatch_flag() {
        let set = ProcessorSet::new(2);
        set.update_heir(CpuIndex(0), CpuIndex(1), Tid(7), &NoopIpi);
        assert_eq!(set.heir::<Tid>(CpuIndex(1)), Some(Tid(7)));
        assert!(set.dispatch_necessary(CpuIndex(1)));
    }

    #[test]
    fn no_ipi_to_local_processor() {
        let set = ProcessorSet::new(2);
        let ipi = CountingIpi { sent: core::cell::Cell::new(0) };
        set.update_heir(CpuIndex(0), CpuIndex(0), Tid(3), &ipi);
        assert_eq!(ipi.sent.get(), 0);
    }

    #[test]
    fn ipi_sent_exactly_once_to_remote_processor() {
        let set = ProcessorSet::new(2);
        let ipi = CountingIpi { sent: core::cell::Cell::new(0) };
        set.update_heir(CpuIndex(0), CpuIndex(1), Tid(3), &ipi);
        assert_eq!(ipi.sent.get(), 1);

        // dispatch_necessary was already true: a second update must not
        // raise a second IPI (avoid superfluous IPIs, spec.md §4.2 step 5).
        set.update_heir(CpuIndex(0), CpuIndex(1), Tid(4), &ipi);
        assert_eq!(ipi.sent.get(), 1);
    }

    #[test]
    fn acknowledge_dispatch_clears_flag() {
        let set = ProcessorSet::new(1);
        set.update_heir(CpuIndex(0), CpuIndex(0), Tid(1), &NoopIpi);
        assert!(set.dispatch_necessary(CpuIndex(0)));
        set.acknowledge_dispatch(CpuIndex(0));
        assert!(!set.dispatch_necessary(CpuIndex(0)));
    }
}
