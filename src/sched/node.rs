/// Per-thread scheduler node and its state transition guard.
///
/// A node's state always matches exactly one of the sets a managed thread can
/// be a member of (I1/I2): SCHEDULED threads are in the scheduled set and
/// nowhere else, READY threads are in the ready set, BLOCKED and IN_THE_AIR
/// threads are in neither.

/// A stable, copyable identifier for a thread managed by a scheduler
/// instance. Concrete schedulers index their own storage (ready/scheduled
/// sets, thread directory) by this handle instead of holding a reference,
/// breaking the Thread <-> SchedulerNode <-> ProcessorRecord reference cycle.
pub trait ThreadHandle: Copy + Eq + Ord + core::fmt::Debug {
    /// A dense index usable to address arena-style storage (e.g. the atomic
    /// heir slot in a `ProcessorRecord`).
    fn index(&self) -> usize;

    /// Inverse of `index`. Round-tripping through `index`/`from_index` must
    /// reproduce the original handle — this is what lets a `ProcessorRecord`
    /// store a heir as a bare `AtomicUsize` instead of `Id` directly.
    fn from_index(index: usize) -> Self;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Blocked,
    Scheduled,
    Ready,
    InTheAir,
}

impl NodeState {
    const fn row(self) -> usize {
        match self {
            NodeState::Blocked => 0,
            NodeState::Scheduled => 1,
            NodeState::Ready => 2,
            NodeState::InTheAir => 3,
        }
    }
}

/// Valid (from, to) state transitions, per spec.md §4.1. Rows = from,
/// columns = to. This is the only table `change_state` consults; there is no
/// other path to a state mutation.
#[rustfmt::skip]
const VALID_TRANSITIONS: [[bool; 4]; 4] = {
    // columns: BLOCKED, SCHEDULED, READY, IN_THE_AIR
    let mut t = [[false; 4]; 4];
    t[NodeState::Blocked.row()]   = [false, true,  true,  false]; // enqueue wins / loses
    t[NodeState::Scheduled.row()] = [false, false, true,  true];  // enqueue-other displaces / extract
    t[NodeState::Ready.row()]     = [true,  true,  false, false]; // block / enqueue-other promotes
    t[NodeState::InTheAir.row()]  = [true,  true,  true,  false]; // schedule / enqueue re-seats / enqueue loses
    t
};

fn is_valid_transition(from: NodeState, to: NodeState) -> bool {
    VALID_TRANSITIONS[from.row()][to.row()]
}

/// Per-thread scheduler state tag (§3). Does not carry the thread's
/// priority or CPU — those live on the thread itself, reached through
/// `SchedulerOps`.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerNode {
    state: NodeState,
}

impl SchedulerNode {
    /// A freshly managed thread starts BLOCKED (not runnable, in no set).
    pub const fn new() -> Self {
        SchedulerNode {
            state: NodeState::Blocked,
        }
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    /// The single guarded primitive through which every state mutation
    /// passes (§4.1). Panics — a programming error, per spec.md §7 — if the
    /// transition is not one of the table's permitted edges.
    pub fn change_state(&mut self, new_state: NodeState) {
        assert!(
            is_valid_transition(self.state, new_state),
            "invalid scheduler node transition: {:?} -> {:?}",
            self.state,
            new_state
        );
        self.state = new_state;
    }
}

impl Default for SchedulerNode {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_node_is_blocked() {
        assert_eq!(SchedulerNode::new().state(), NodeState::Blocked);
    }

    #[test]
    fn blocked_to_scheduled_and_ready_are_legal() {
        let mut n = SchedulerNode::new();
        n.change_state(NodeState::Scheduled);
        assert_eq!(n.state(), NodeState::Scheduled);

        let mut n = SchedulerNode::new();
        n.change_state(NodeState::Ready);
        assert_eq!(n.state(), NodeState::Ready);
    }

    #[test]
    #[should_panic(expected = "invalid scheduler node transition")]
    fn blocked_to_in_the_air_is_illegal() {
        let mut n = SchedulerNode::new();
        n.change_state(NodeState::InTheAir);
    }

    #[test]
    #[should_panic(expected = "invalid scheduler node transition")]
    fn scheduled_to_blocked_is_illegal() {
        let mut n = SchedulerNode::new();
        n.change_state(NodeState::Scheduled);
        n.change_state(NodeState::Blocked);
    }

    #[test]
    fn full_lifecycle_round_trip() {
        let mut n = SchedulerNode::new();
        n.change_state(NodeState::Ready); // enqueue loses
        n.change_state(NodeState::Scheduled); // enqueue-other promotes
        n.change_state(NodeState::InTheAir); // extract
        n.change_state(NodeState::Blocked); // schedule
        assert_eq!(n.state(), NodeState::Blocked);
    }

    #[test]
    #[should_panic(expected = "invalid scheduler node transition")]
    fn in_the_air_to_in_the_air_is_illegal() {
        let mut n = SchedulerNode::new();
        n.change_state(NodeState::Scheduled);
        n.change_state(NodeState::InTheAir);
        n.change_state(NodeState::InTheAir);
    }
}
