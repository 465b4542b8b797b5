/// A reference, fixed-priority `SchedulerOps` implementation: two ordered
/// `Vec<Id>`s (ready set, scheduled set), a priority per thread, and a
/// tie-break mode selecting FIFO or LIFO ordering among threads of equal
/// priority (spec.md Open Question #2, `insert_scheduled_fifo`/`_lifo`).
///
/// Priorities are plain `u32`s where a *smaller* number means *higher*
/// priority, matching the scenarios in spec.md §8 (idles at 5, A=1, B=2,
/// C=3).
extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use super::node::ThreadHandle;
use super::ops::SchedulerOps;
use super::processor::CpuIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreak {
    /// Equal-priority newcomers never displace an existing thread.
    Fifo,
    /// Equal-priority newcomers displace the most recently inserted thread
    /// of the same priority.
    Lifo,
}

struct ThreadInfo {
    priority: u32,
    seq: u64,
    is_executing: bool,
    current_cpu: Option<CpuIndex>,
}

pub struct SimpleScheduler<Id: ThreadHandle> {
    tie_break: TieBreak,
    next_seq: u64,
    threads: BTreeMap<Id, ThreadInfo>,
    ready: Vec<Id>,
    scheduled: Vec<Id>,
}

impl<Id: ThreadHandle> SimpleScheduler<Id> {
    pub fn new(tie_break: TieBreak) -> Self {
        SimpleScheduler {
            tie_break,
            next_seq: 0,
            threads: BTreeMap::new(),
            ready: Vec::new(),
            scheduled: Vec::new(),
        }
    }

    /// Register a new thread at `priority`. Must be called before the
    /// thread is handed to any `SchedulerCore` operation.
    pub fn register(&mut self, id: Id, priority: u32) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.threads.insert(
            id,
            ThreadInfo {
                priority,
                seq,
                is_executing: false,
                current_cpu: None,
            },
        );
    }

    pub fn set_priority(&mut self, id: Id, priority: u32) {
        if let Some(info) = self.threads.get_mut(&id) {
            info.priority = priority;
        }
    }

    pub fn priority(&self, id: Id) -> u32 {
        self.threads[&id].priority
    }

    pub fn set_executing(&mut self, id: Id, executing: bool) {
        if let Some(info) = self.threads.get_mut(&id) {
            info.is_executing = executing;
        }
    }

    pub fn ready_set(&self) -> &[Id] {
        &self.ready
    }

    pub fn scheduled_set(&self) -> &[Id] {
        &self.scheduled
    }
}

impl<Id: ThreadHandle> SchedulerOps<Id> for SimpleScheduler<Id> {
    fn order(&self, a: Id, b: Id) -> bool {
        let pa = self.threads[&a].priority;
        let pb = self.threads[&b].priority;
        if pa != pb {
            return pa < pb;
        }
        match self.tie_break {
            TieBreak::Fifo => false,
            TieBreak::Lifo => self.threads[&a].seq > self.threads[&b].seq,
        }
    }

    fn get_highest_ready(&self) -> Option<Id> {
        self.ready.first().copied()
    }

    fn lowest_scheduled(&self) -> Option<Id> {
        self.scheduled.last().copied()
    }

    fn remove(&mut self, id: Id) {
        if let Some(pos) = self.ready.iter().position(|&x| x == id) {
            self.ready.remove(pos);
            return;
        }
        if let Some(pos) = self.scheduled.iter().position(|&x| x == id) {
            self.scheduled.remove(pos);
        }
    }

    fn insert_ready(&mut self, id: Id) {
        let pos = self
            .ready
            .iter()
            .position(|&existing| self.order(id, existing))
            .unwrap_or(self.ready.len());
        self.ready.insert(pos, id);
    }

    fn insert_scheduled(&mut self, id: Id) {
        let pos = self
            .scheduled
            .iter()
            .position(|&existing| self.order(id, existing))
            .unwrap_or(self.scheduled.len());
        self.scheduled.insert(pos, id);
    }

    fn move_ready_to_scheduled(&mut self, id: Id) {
        if let Some(pos) = self.ready.iter().position(|&x| x == id) {
            self.ready.remove(pos);
        }
        self.insert_scheduled(id);
    }

    fn move_scheduled_to_ready(&mut self, id: Id) {
        if let Some(pos) = self.scheduled.iter().position(|&x| x == id) {
            self.scheduled.remove(pos);
        }
        self.insert_ready(id);
    }

    fn is_executing(&self, id: Id) -> bool {
        self.threads.get(&id).map(|t| t.is_executing).unwrap_or(false)
    }

    fn current_cpu(&self, id: Id) -> Option<CpuIndex> {
        self.threads.get(&id).and_then(|t| t.current_cpu)
    }

    fn set_current_cpu(&mut self, id: Id, cpu: CpuIndex) {
        if let Some(info) = self.threads.get_mut(&id) {
            info.current_cpu = Some(cpu);
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

    #[test]
    fn fifo_ties_keep_insertion_order() {
        let mut s = SimpleScheduler::new(TieBreak::Fifo);
        s.register(Tid(1), 5);
        s.register(Tid(2), 5);
        s.insert_ready(Tid(1));
        s.insert_ready(Tid(2));
        assert_eq!(s.ready_set(), &[Tid(1), Tid(2)]);
        assert!(!s.order(Tid(2), Tid(1)));
    }

    #[test]
    fn lifo_ties_reverse_insertion_order() {
        let mut s = SimpleScheduler::new(TieBreak::Lifo);
        s.register(Tid(1), 5);
        s.register(Tid(2), 5);
        s.insert_ready(Tid(1));
        s.insert_ready(Tid(2));
        assert_eq!(s.ready_set(), &[Tid(2), Tid(1)]);
        assert!(s.order(Tid(2), Tid(1)));
    }

    #[test]
    fn order_is_antisymmetric() {
        let mut s = SimpleScheduler::new(TieBreak::Fifo);
        s.register(Tid(1), 1);
        s.register(Tid(2), 2);
        assert!(s.order(Tid(1), Tid(2)));
        assert!(!s.order(Tid(2), Tid(1)));
    }

    #[test]
    fn insert_scheduled_keeps_priority_order() {
        let mut s = SimpleScheduler::new(TieBreak::Fifo);
        s.register(Tid(3), 3);
        s.register(Tid(1), 1);
        s.register(Tid(2), 2);
        s.insert_scheduled(Tid(3));
        s.insert_scheduled(Tid(1));
        s.insert_scheduled(Tid(2));
        assert_eq!(s.scheduled_set(), &[Tid(1), Tid(2), Tid(3)]);
        assert_eq!(s.lowest_scheduled(), Some(Tid(3)));
    }
}
