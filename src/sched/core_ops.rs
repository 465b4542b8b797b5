/// `SchedulerCore<Id>`: the state-machine driver (spec.md §4.3) — the
/// public contract of the scheduler. Owns only the per-thread node table
/// and the `ProcessorSet`; everything about *which* thread is highest
/// priority is delegated to a `SchedulerOps<Id>` passed by the caller on
/// every call, matching the design note to monomorphise per concrete
/// scheduler rather than box a trait object into the hot path.
extern crate alloc;

use alloc::collections::BTreeMap;

use super::node::{NodeState, SchedulerNode, ThreadHandle};
use super::ops::SchedulerOps;
use super::processor::{CpuIndex, InterProcessorInterrupt, ProcessorSet};

pub struct SchedulerCore<Id: ThreadHandle> {
    nodes: BTreeMap<Id, SchedulerNode>,
    processors: ProcessorSet,
}

impl<Id: ThreadHandle> SchedulerCore<Id> {
    pub fn new(processor_count: usize) -> Self {
        SchedulerCore {
            nodes: BTreeMap::new(),
            processors: ProcessorSet::new(processor_count),
        }
    }

    pub fn processor_count(&self) -> usize {
        self.processors.processor_count()
    }

    /// The thread currently named as `cpu`'s heir. Exposed for the thread
    /// layer's dispatcher, which has to know who to context-switch into
    /// after a round of `enqueue`/`extract`/`schedule`/`block` calls.
    pub fn heir(&self, cpu: CpuIndex) -> Option<Id> {
        self.processors.heir(cpu)
    }

    /// Current node state of `id` (BLOCKED if never touched by this
    /// instance).
    pub fn state(&self, id: Id) -> NodeState {
        self.nodes.get(&id).map(|n| n.state()).unwrap_or(NodeState::Blocked)
    }

    fn node_mut(&mut self, id: Id) -> &mut SchedulerNode {
        self.nodes.entry(id).or_insert_with(SchedulerNode::new)
    }

    /// Initialization-time only (spec.md §4.3 `start_idle`): seed `id` as
    /// SCHEDULED on `cpu` before any runtime operation runs. Must be called
    /// once per processor before `enqueue`/`extract`/`schedule`/`block` are
    /// used, so `allocate_processor`'s "owned processor always has a heir"
    /// precondition holds from the first real operation onward.
    pub fn start_idle<O, I>(&mut self, ops: &mut O, ipi: &I, id: Id, cpu: CpuIndex)
    where
        O: SchedulerOps<Id>,
        I: InterProcessorInterrupt,
    {
        self.node_mut(id).change_state(NodeState::Scheduled);
        ops.insert_scheduled(id);
        ops.set_current_cpu(id, cpu);
        self.processors.update_heir(cpu, cpu, id, ipi);
    }

    /// spec.md §4.3 `enqueue`.
    pub fn enqueue<O, I>(&mut self, ops: &mut O, ipi: &I, cpu_self: CpuIndex, thread: Id)
    where
        O: SchedulerOps<Id>,
        I: InterProcessorInterrupt,
    {
        match self.state(thread) {
            NodeState::InTheAir => {
                let highest_ready = ops.get_highest_ready();
                // H outranks thread iff thread does not order-before H — do
                // not exchange the parameters to negate this instead, the
                // two only agree on a strict order and diverge on a tie.
                let ready_outranks_thread =
                    highest_ready.map(|h| !ops.order(thread, h)).unwrap_or(false);

                if ready_outranks_thread {
                    let highest_ready = highest_ready.expect("checked above");
                    self.node_mut(thread).change_state(NodeState::Ready);
                    self.allocate_processor(ops, ipi, cpu_self, highest_ready, thread);
                    ops.insert_ready(thread);
                    ops.move_ready_to_scheduled(highest_ready);
                } else {
                    self.node_mut(thread).change_state(NodeState::Scheduled);
                    ops.insert_scheduled(thread);
                }
            }
            NodeState::Blocked | NodeState::Ready => {
                let lowest = ops.lowest_scheduled();
                let thread_outranks_lowest =
                    lowest.map(|l| ops.order(thread, l)).unwrap_or(false);

                if thread_outranks_lowest {
                    let lowest = lowest.expect("checked above");
                    self.node_mut(lowest).change_state(NodeState::Ready);
                    self.allocate_processor(ops, ipi, cpu_self, thread, lowest);
                    ops.insert_scheduled(thread);
                    ops.move_scheduled_to_ready(lowest);
                } else {
                    self.node_mut(thread).change_state(NodeState::Ready);
                    ops.insert_ready(thread);
                }
            }
            NodeState::Scheduled => {
                // Guarded primitive rejects this transition; enqueueing an
                // already-scheduled thread is a caller error (I6).
                self.node_mut(thread).change_state(NodeState::Scheduled);
            }
        }
    }

    /// spec.md §4.3 `extract`. Performs the state transition the concrete
    /// scheduler's own `extract` handles in the literal RTEMS source (see
    /// DESIGN.md's Open Question resolution #3), then asks `ops` to drop
    /// `thread` from whichever container currently holds it.
    pub fn extract<O: SchedulerOps<Id>>(&mut self, ops: &mut O, thread: Id) {
        match self.state(thread) {
            NodeState::Scheduled => self.node_mut(thread).change_state(NodeState::InTheAir),
            NodeState::Ready => self.node_mut(thread).change_state(NodeState::Blocked),
            // Extracting a BLOCKED or already-IN_THE_AIR thread is a no-op:
            // skip the guarded primitive entirely rather than feeding it a
            // same-state transition, which it would reject.
            _ => {}
        }
        ops.remove(thread);
    }

    /// spec.md §4.3 `schedule`.
    pub fn schedule<O, I>(&mut self, ops: &mut O, ipi: &I, cpu_self: CpuIndex, thread: Id)
    where
        O: SchedulerOps<Id>,
        I: InterProcessorInterrupt,
    {
        if self.state(thread) != NodeState::InTheAir {
            return;
        }
        self.node_mut(thread).change_state(NodeState::Blocked);

        let highest_ready = ops
            .get_highest_ready()
            .expect("schedule's IN_THE_AIR branch requires a non-empty ready set");
        self.allocate_processor(ops, ipi, cpu_self, highest_ready, thread);
        ops.move_ready_to_scheduled(highest_ready);
    }

    /// spec.md §4.3 `block`: `extract(thread); schedule(thread)`.
    pub fn block<O, I>(&mut self, ops: &mut O, ipi: &I, cpu_self: CpuIndex, thread: Id)
    where
        O: SchedulerOps<Id>,
        I: InterProcessorInterrupt,
    {
        self.extract(ops, thread);
        self.schedule(ops, ipi, cpu_self, thread);
    }

    /// spec.md §4.2 `AllocateProcessor`. Private: only `enqueue`/`schedule`
    /// call it, always under the caller's scheduler lock (§5).
    fn allocate_processor<O, I>(
        &mut self,
        ops: &mut O,
        ipi: &I,
        cpu_self: CpuIndex,
        scheduled: Id,
        victim: Id,
    ) where
        O: SchedulerOps<Id>,
        I: InterProcessorInterrupt,
    {
        self.node_mut(scheduled).change_state(NodeState::Scheduled);

        let cpu_of_victim = ops
            .current_cpu(victim)
            .expect("victim thread has no current CPU");

        let heir = if ops.is_executing(scheduled) {
            let cpu_of_scheduled = ops
                .current_cpu(scheduled)
                .expect("executing thread has no current CPU");
            if self.processors.owns(cpu_of_scheduled) {
                let displaced = self
                    .processors
                    .heir::<Id>(cpu_of_scheduled)
                    .expect("processor owned by this instance always has a heir");
                self.processors.update_heir(cpu_self, cpu_of_scheduled, scheduled, ipi);
                displaced
            } else {
                scheduled
            }
        } else {
            scheduled
        };

        if heir != victim {
            ops.set_current_cpu(heir, cpu_of_victim);
            self.processors.update_heir(cpu_self, cpu_of_victim, heir, ipi);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::simple::{SimpleScheduler, TieBreak};

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

    const P0: CpuIndex = CpuIndex(0);
    const P1: CpuIndex = CpuIndex(1);
    const IDLE_I: Tid = Tid(100);
    const IDLE_J: Tid = Tid(101);
    const A: Tid = Tid(1);
    const B: Tid = Tid(2);
    const C: Tid = Tid(3);

    /// Every scenario starts with two idles seated on two processors —
    /// the setup described at the top of spec.md §8.
    fn fresh_pair() -> (SchedulerCore<Tid>, SimpleScheduler<Tid>) {
        let mut core = SchedulerCore::new(2);
        let mut ops = SimpleScheduler::new(TieBreak::Fifo);
        ops.register(IDLE_I, 5);
        ops.register(IDLE_J, 5);
        ops.set_executing(IDLE_I, true);
        ops.set_executing(IDLE_J, true);
        core.start_idle(&mut ops, &NoopIpi, IDLE_I, P0);
        core.start_idle(&mut ops, &NoopIpi, IDLE_J, P1);
        (core, ops)
    }

    fn assert_invariants(core: &SchedulerCore<Tid>, ops: &SimpleScheduler<Tid>) {
        // P3/I3/I4: every processor's heir is SCHEDULED, and heirs are
        // pairwise distinct.
        let mut heirs = alloc::vec::Vec::new();
        for i in 0..core.processor_count() {
            let cpu = CpuIndex(i);
            let heir = core.processors.heir::<Tid>(cpu).expect("seeded processor has a heir");
            assert_eq!(core.state(heir), NodeState::Scheduled);
            heirs.push(heir);
        }
        let mut dedup = heirs.clone();
        dedup.sort_by_key(|t| t.0);
        dedup.dedup();
        assert_eq!(dedup.len(), heirs.len(), "heirs must be pairwise distinct");

        // P4/I5: scheduler invariant — no ready thread outranks any
        // scheduled thread.
        if let (Some(&lowest_scheduled), Some(&highest_ready)) =
            (ops.scheduled_set().last(), ops.ready_set().first())
        {
            assert!(
                !ops.order(highest_ready, lowest_scheduled),
                "a ready thread must never outrank a scheduled thread"
            );
        }
    }

    #[test]
    fn s1_enqueue_a_displaces_an_idle() {
        let (mut core, mut ops) = fresh_pair();
        ops.register(A, 1);
        ops.set_executing(A, false);

        core.enqueue(&mut ops, &NoopIpi, P0, A);

        assert_eq!(core.state(A), NodeState::Scheduled);
        assert_eq!(ops.scheduled_set().len(), 2);
        assert_eq!(ops.ready_set().len(), 1);
        assert!(ops.scheduled_set().contains(&A));
        assert_invariants(&core, &ops);
    }

    #[test]
    fn s2_enqueue_c_then_both_idles_ready() {
        let (mut core, mut ops) = fresh_pair();
        ops.register(A, 1);
        ops.register(C, 3);
        ops.set_executing(A, false);
        ops.set_executing(C, false);

        core.enqueue(&mut ops, &NoopIpi, P0, A);
        core.enqueue(&mut ops, &NoopIpi, P0, C);

        assert_eq!(ops.scheduled_set(), &[A, C]);
        assert_eq!(ops.ready_set().len(), 2);
        assert!(ops.ready_set().contains(&IDLE_I));
        assert!(ops.ready_set().contains(&IDLE_J));
        assert_invariants(&core, &ops);
    }

    #[test]
    fn s3_enqueue_b_demotes_c() {
        let (mut core, mut ops) = fresh_pair();
        ops.register(A, 1);
        ops.register(B, 2);
        ops.register(C, 3);
        for t in [A, B, C] {
            ops.set_executing(t, false);
        }

        core.enqueue(&mut ops, &NoopIpi, P0, A);
        core.enqueue(&mut ops, &NoopIpi, P0, C);
        core.enqueue(&mut ops, &NoopIpi, P0, B);

        assert_eq!(ops.scheduled_set(), &[A, B]);
        assert_eq!(core.state(C), NodeState::Ready);
        assert!(ops.ready_set().contains(&C));
        assert_invariants(&core, &ops);
    }

    #[test]
    fn s4_extract_a_goes_in_the_air() {
        let (mut core, mut ops) = fresh_pair();
        ops.register(A, 1);
        ops.register(B, 2);
        ops.register(C, 3);
        for t in [A, B, C] {
            ops.set_executing(t, false);
        }
        core.enqueue(&mut ops, &NoopIpi, P0, A);
        core.enqueue(&mut ops, &NoopIpi, P0, C);
        core.enqueue(&mut ops, &NoopIpi, P0, B);

        core.extract(&mut ops, A);

        assert_eq!(core.state(A), NodeState::InTheAir);
        assert_eq!(ops.scheduled_set(), &[B]);
        assert!(!ops.ready_set().contains(&A));
        assert!(!ops.scheduled_set().contains(&A));
    }

    #[test]
    fn s5_raise_a_priority_then_enqueue_c_wins() {
        let (mut core, mut ops) = fresh_pair();
        ops.register(A, 1);
        ops.register(B, 2);
        ops.register(C, 3);
        for t in [A, B, C] {
            ops.set_executing(t, false);
        }
        core.enqueue(&mut ops, &NoopIpi, P0, A);
        core.enqueue(&mut ops, &NoopIpi, P0, C);
        core.enqueue(&mut ops, &NoopIpi, P0, B);
        core.extract(&mut ops, A);

        ops.set_priority(A, 4);
        core.enqueue(&mut ops, &NoopIpi, P0, A);

        assert_eq!(ops.scheduled_set(), &[B, C]);
        assert_eq!(core.state(A), NodeState::Ready);
        assert!(ops.ready_set().contains(&A));
        assert_invariants(&core, &ops);
    }

    #[test]
    fn s6_schedule_after_extract_promotes_c() {
        let (mut core, mut ops) = fresh_pair();
        ops.register(A, 1);
        ops.register(B, 2);
        ops.register(C, 3);
        for t in [A, B, C] {
            ops.set_executing(t, false);
        }
        core.enqueue(&mut ops, &NoopIpi, P0, A);
        core.enqueue(&mut ops, &NoopIpi, P0, C);
        core.enqueue(&mut ops, &NoopIpi, P0, B);
        core.extract(&mut ops, A);

        core.schedule(&mut ops, &NoopIpi, P0, A);

        assert_eq!(core.state(A), NodeState::Blocked);
        assert_eq!(ops.scheduled_set(), &[B, C]);
        assert!(ops.ready_set().contains(&IDLE_I));
        assert!(ops.ready_set().contains(&IDLE_J));
        assert_invariants(&core, &ops);
    }

    #[test]
    fn p6_extract_then_enqueue_round_trips() {
        let (mut core, mut ops) = fresh_pair();
        ops.register(A, 1);
        ops.set_executing(A, false);
        core.enqueue(&mut ops, &NoopIpi, P0, A);

        let scheduled_before = ops.scheduled_set().to_vec();
        core.extract(&mut ops, A);
        core.enqueue(&mut ops, &NoopIpi, P0, A);

        assert_eq!(ops.scheduled_set(), scheduled_before.as_slice());
        assert_eq!(core.state(A), NodeState::Scheduled);
    }

    #[test]
    fn p7_block_on_already_blocked_thread_is_a_no_op() {
        let mut core = SchedulerCore::<Tid>::new(1);
        let mut ops = SimpleScheduler::new(TieBreak::Fifo);
        ops.register(A, 1);
        assert_eq!(core.state(A), NodeState::Blocked);

        core.extract(&mut ops, A);
        assert_eq!(core.state(A), NodeState::Blocked);
    }

    #[test]
    #[should_panic]
    fn schedule_in_the_air_with_empty_ready_set_is_fatal() {
        let mut core = SchedulerCore::<Tid>::new(1);
        let mut ops = SimpleScheduler::new(TieBreak::Fifo);
        ops.register(IDLE_I, 5);
        ops.set_executing(IDLE_I, true);
        core.start_idle(&mut ops, &NoopIpi, IDLE_I, P0);

        core.extract(&mut ops, IDLE_I);
        core.schedule(&mut ops, &NoopIpi, P0, IDLE_I);
    }
}
