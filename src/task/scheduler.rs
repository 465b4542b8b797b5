/// Preemptive thread scheduler.
///
/// Manages kernel threads that each have their own stack and are
/// preempted by the timer interrupt. The executor's main loop is the
/// "idle context" — when no threads are ready, control returns there
/// to poll async futures as before.
///
/// Built as a one-processor instantiation of `crate::sched::SchedulerCore`:
/// this module supplies the `ThreadHandle`, the `SchedulerOps` (a plain
/// `SimpleScheduler` with every user thread at the same priority, so equal
/// priority falls back to round-robin rotation), and the per-thread stack
/// bookkeeping the CORE itself doesn't know about. Every tick, the
/// currently-running thread is rotated off the CPU with `block` and
/// immediately re-offered with `enqueue`; for same-priority threads this
/// always lands it back at the tail of the ready set, which is what gives
/// the round-robin behavior its name.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::Mutex;

use crate::sched::{
    CpuIndex, InterProcessorInterrupt, NodeState, SchedulerCore, SimpleScheduler, ThreadHandle,
    TieBreak,
};

use super::context::InterruptFrame;
use super::process::PROCESS_TABLE;
use super::TaskId;

const THREAD_STACK_SIZE: usize = 16 * 1024; // 16 KiB per thread

// Kernel segment selectors (must match gdt.rs init order)
const KERNEL_CS: u64 = 0x08;
const KERNEL_SS: u64 = 0x10;

const CPU0: CpuIndex = CpuIndex(0);

/// Every user thread sits at the same priority: the CORE sees them as an
/// undifferentiated band and round-robins within it. The idle context sits
/// below every real thread so it only ever runs when nothing else is ready.
const USER_PRIORITY: u32 = 100;
const IDLE_PRIORITY: u32 = u32::MAX;

/// Identifies the idle context to the CORE. Deliberately disjoint from any
/// PID a real thread can have (`TaskId`'s counter starts at 0 and only
/// grows), so it can never collide with a spawned thread.
const IDLE: ThreadId = ThreadId(u64::MAX);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ThreadId(u64);

impl ThreadId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl ThreadHandle for ThreadId {
    fn index(&self) -> usize {
        self.0 as usize
    }

    fn from_index(index: usize) -> Self {
        ThreadId(index as u64)
    }
}

struct NoopIpi;

impl InterProcessorInterrupt for NoopIpi {
    // Single physical CPU: `update_heir` never targets a processor other
    // than the caller's own, so this is never actually invoked.
    fn send(&self, _cpu: CpuIndex) {}
}

/// Everything the CORE doesn't know about a thread: its stack, its saved
/// register frame, and why it might currently be off the ready set.
struct ThreadRecord {
    name: String,
    parent_pid: Option<u64>,
    stack_bottom: *mut u8,
    stack_size: usize,
    saved_frame: *mut InterruptFrame,
    sleeping_until: Option<u64>,
    terminated: bool,
}

// Raw pointers here are only ever touched with the scheduler lock held.
unsafe impl Send for ThreadRecord {}

pub struct Scheduler {
    core: SchedulerCore<ThreadId>,
    ops: SimpleScheduler<ThreadId>,
    threads: BTreeMap<ThreadId, ThreadRecord>,
    current: ThreadId,
    // Deferred stack deallocation: we can't free a thread's stack while the
    // ISR is still running on it, so we defer it to the next schedule() call.
    deferred_dealloc: Option<(*mut u8, usize)>,
}

unsafe impl Send for Scheduler {}

pub static SCHEDULER: Mutex<Option<Scheduler>> = Mutex::new(None);
static SCHEDULER_ENABLED: AtomicBool = AtomicBool::new(false);

fn alloc_thread_id() -> u64 {
    // Use the same TaskId counter so PIDs don't collide with async tasks.
    TaskId::new().as_u64()
}

/// Initialize the scheduler. Call after process table init.
pub fn init() {
    let mut core = SchedulerCore::new(1);
    let mut ops = SimpleScheduler::new(TieBreak::Fifo);
    ops.register(IDLE, IDLE_PRIORITY);
    core.start_idle(&mut ops, &NoopIpi, IDLE, CPU0);

    let mut threads = BTreeMap::new();
    threads.insert(
        IDLE,
        ThreadRecord {
            name: String::from("idle"),
            parent_pid: None,
            stack_bottom: core::ptr::null_mut(),
            stack_size: 0,
            saved_frame: core::ptr::null_mut(),
            sleeping_until: None,
            terminated: false,
        },
    );

    *SCHEDULER.lock() = Some(Scheduler {
        core,
        ops,
        threads,
        current: IDLE,
        deferred_dealloc: None,
    });
    SCHEDULER_ENABLED.store(true, Ordering::Release);
    log::info!("preemptive scheduler initialized");
}

pub fn is_enabled() -> bool {
    SCHEDULER_ENABLED.load(Ordering::Acquire)
}

/// Called from the timer ISR. Uses try_lock to avoid deadlock if the
/// scheduler lock is already held by the preempted code.
pub fn try_schedule(current_frame: *mut InterruptFrame) -> Option<*mut InterruptFrame> {
    let mut guard = SCHEDULER.try_lock()?;
    let sched = guard.as_mut()?;
    Some(sched.schedule(current_frame))
}

impl Scheduler {
    fn schedule(&mut self, current_frame: *mut InterruptFrame) -> *mut InterruptFrame {
        // Free any previously-deferred stack (safe: we're now on a different stack).
        if let Some((ptr, size)) = self.deferred_dealloc.take() {
            dealloc_stack(ptr, size);
        }

        let current = self.current;
        if let Some(record) = self.threads.get_mut(&current) {
            record.saved_frame = current_frame;
        }

        self.wake_expired_sleepers();

        let terminated = self
            .threads
            .get(&current)
            .map(|r| r.terminated)
            .unwrap_or(false);
        let sleeping = self
            .threads
            .get(&current)
            .map(|r| r.sleeping_until.is_some())
            .unwrap_or(false);

        if terminated {
            // Threads in the ready queue are not currently executing, so
            // their stacks can be freed immediately; the running one's
            // stack is still live under the ISR, so defer it.
            if current != IDLE {
                if let Some(record) = self.threads.get(&current) {
                    self.deferred_dealloc = Some((record.stack_bottom, record.stack_size));
                }
            }
            self.core.block(&mut self.ops, &NoopIpi, CPU0, current);
            self.threads.remove(&current);
        } else if sleeping {
            // `sleep_ms` already called `block` on itself before looping;
            // nothing to rotate here.
        } else if current == IDLE && self.ops.get_highest_ready().is_none() {
            // Nobody else wants the CPU — stay on idle without touching
            // the CORE at all (there is nothing to rotate it with).
        } else {
            // Ordinary tick: take the CPU away and immediately re-offer the
            // same thread. Equal-priority peers outrank nothing, so this
            // always lands the thread at the tail of the ready set.
            self.core.block(&mut self.ops, &NoopIpi, CPU0, current);
            self.core.enqueue(&mut self.ops, &NoopIpi, CPU0, current);
        }

        let heir = self.core.heir(CPU0).unwrap_or(IDLE);
        self.current = heir;
        self.threads
            .get(&heir)
            .map(|r| r.saved_frame)
            .unwrap_or(core::ptr::null_mut())
    }

    /// Bring any thread whose sleep timer has expired back onto the ready
    /// set. Runs every tick, not just for the currently-running thread —
    /// matches the teacher's original "wake expired sleepers" sweep.
    fn wake_expired_sleepers(&mut self) {
        let current_tick = crate::interrupts::TICK_COUNT.load(Ordering::Relaxed);
        let due: Vec<ThreadId> = self
            .threads
            .iter()
            .filter(|(&id, record)| {
                id != self.current
                    && record.sleeping_until.map_or(false, |wake| current_tick >= wake)
                    && self.core.state(id) == NodeState::Blocked
            })
            .map(|(&id, _)| id)
            .collect();

        for id in due {
            if let Some(record) = self.threads.get_mut(&id) {
                record.sleeping_until = None;
            }
            self.core.enqueue(&mut self.ops, &NoopIpi, CPU0, id);
        }
    }
}

fn dealloc_stack(stack_bottom: *mut u8, stack_size: usize) {
    if !stack_bottom.is_null() {
        unsafe {
            let layout = alloc::alloc::Layout::from_size_align(stack_size, 16).unwrap();
            alloc::alloc::dealloc(stack_bottom, layout);
        }
    }
}

/// Spawn a new preemptible thread. Returns the thread's PID.
pub fn spawn_thread(name: String, entry_fn: fn(u64), arg: u64, parent_pid: Option<u64>) -> u64 {
    let pid = alloc_thread_id();
    let id = ThreadId(pid);

    // Allocate stack
    let layout = alloc::alloc::Layout::from_size_align(THREAD_STACK_SIZE, 16).unwrap();
    let stack_bottom = unsafe { alloc::alloc::alloc_zeroed(layout) };
    if stack_bottom.is_null() {
        panic!("Failed to allocate thread stack");
    }
    let stack_top = unsafe { stack_bottom.add(THREAD_STACK_SIZE) } as u64;

    // Build a synthetic InterruptFrame at the top of the stack.
    // When the scheduler switches to this thread, the ISR will pop these
    // registers and iretq will jump to thread_entry_wrapper.
    let frame_ptr = unsafe {
        let ptr = (stack_top as *mut InterruptFrame).sub(1);
        core::ptr::write(
            ptr,
            InterruptFrame {
                r15: 0,
                r14: 0,
                r13: 0,
                r12: 0,
                r11: 0,
                r10: 0,
                r9: 0,
                r8: 0,
                rbp: 0,
                rdi: arg,
                rsi: entry_fn as u64,
                rdx: 0,
                rcx: 0,
                rbx: 0,
                rax: 0,
                rip: thread_entry_wrapper as *const () as u64,
                cs: KERNEL_CS,
                rflags: 0x202, // IF (interrupts enabled) + reserved bit 1
                rsp: stack_top, // thread starts with empty stack
                ss: KERNEL_SS,
            },
        );
        ptr
    };

    x86_64::instructions::interrupts::without_interrupts(|| {
        let mut table = PROCESS_TABLE.lock();
        if let Some(table) = table.as_mut() {
            table.register(TaskId::from_u64(pid), name.clone(), parent_pid, true);
        }
    });

    x86_64::instructions::interrupts::without_interrupts(|| {
        let mut guard = SCHEDULER.lock();
        if let Some(sched) = guard.as_mut() {
            sched.threads.insert(
                id,
                ThreadRecord {
                    name,
                    parent_pid,
                    stack_bottom,
                    stack_size: THREAD_STACK_SIZE,
                    saved_frame: frame_ptr,
                    sleeping_until: None,
                    terminated: false,
                },
            );
            sched.ops.register(id, USER_PRIORITY);
            sched.core.enqueue(&mut sched.ops, &NoopIpi, CPU0, id);
        }
    });

    pid
}

/// Entry point for all threads. Called via iretq from the synthetic frame.
/// rdi = arg, rsi = actual entry function pointer (set up in the synthetic frame).
extern "C" fn thread_entry_wrapper(arg: u64, entry_fn: u64) {
    let f: fn(u64) = unsafe { core::mem::transmute(entry_fn) };
    f(arg);
    exit_current_thread();
}

/// Mark the current thread as terminated and halt until preempted.
pub fn exit_current_thread() {
    let pid = x86_64::instructions::interrupts::without_interrupts(|| {
        let mut guard = SCHEDULER.lock();
        if let Some(sched) = guard.as_mut() {
            let current = sched.current;
            if current != IDLE {
                if let Some(record) = sched.threads.get_mut(&current) {
                    record.terminated = true;
                    return Some(current.as_u64());
                }
            }
        }
        None
    });

    if let Some(pid) = pid {
        x86_64::instructions::interrupts::without_interrupts(|| {
            let mut table = PROCESS_TABLE.lock();
            if let Some(table) = table.as_mut() {
                table.terminate(pid, 0);
            }
        });
    }

    // Halt until the next timer tick preempts us and cleans up.
    loop {
        x86_64::instructions::hlt();
    }
}

/// Kill a thread by PID. Marks it terminated; cleanup happens on next schedule.
pub fn kill_thread(pid: u64) -> bool {
    let id = ThreadId(pid);
    let found = x86_64::instructions::interrupts::without_interrupts(|| {
        let mut guard = SCHEDULER.lock();
        if let Some(sched) = guard.as_mut() {
            if let Some(record) = sched.threads.get_mut(&id) {
                record.terminated = true;
                return true;
            }
        }
        false
    });

    if found {
        x86_64::instructions::interrupts::without_interrupts(|| {
            let mut table = PROCESS_TABLE.lock();
            if let Some(table) = table.as_mut() {
                table.terminate(pid, 1);
            }
        });
    }

    found
}

/// Check if a PID belongs to a preemptible thread.
pub fn is_thread(pid: u64) -> bool {
    x86_64::instructions::interrupts::without_interrupts(|| {
        let table = PROCESS_TABLE.lock();
        if let Some(table) = table.as_ref() {
            if let Some(proc) = table.get(pid) {
                return proc.is_thread;
            }
        }
        false
    })
}

/// List every live thread as `(pid, name, parent_pid)`. Used by the `ps`
/// shell command.
pub fn list_threads() -> Vec<(u64, String, Option<u64>)> {
    x86_64::instructions::interrupts::without_interrupts(|| {
        let guard = SCHEDULER.lock();
        guard
            .as_ref()
            .map(|sched| {
                sched
                    .threads
                    .iter()
                    .filter(|(&id, _)| id != IDLE)
                    .map(|(&id, record)| (id.as_u64(), record.name.clone(), record.parent_pid))
                    .collect()
            })
            .unwrap_or_default()
    })
}

// --- Sleep support ---

/// Put the current thread to sleep for approximately `ms` milliseconds.
/// Rounds up to 10ms granularity (PIT runs at 100 Hz).
pub fn sleep_ms(ms: u64) {
    let ticks = (ms + 9) / 10; // round up to 10ms granularity
    if ticks == 0 {
        return;
    }

    let current_tick = crate::interrupts::TICK_COUNT.load(Ordering::Relaxed);
    let wake_tick = current_tick.saturating_add(ticks);

    let pid = x86_64::instructions::interrupts::without_interrupts(|| {
        let mut guard = SCHEDULER.lock();
        if let Some(sched) = guard.as_mut() {
            let current = sched.current;
            if current == IDLE {
                return None;
            }
            if let Some(record) = sched.threads.get_mut(&current) {
                record.sleeping_until = Some(wake_tick);
            }
            // Take ourselves off the CPU now; `wake_expired_sleepers` puts
            // us back on the ready set once `wake_tick` has passed.
            sched.core.block(&mut sched.ops, &NoopIpi, CPU0, current);
            return Some(current.as_u64());
        }
        None
    });

    if pid.is_none() {
        crate::serial_println!("WARNING: sleep_ms called from non-thread context");
        return;
    }
    let pid = pid.unwrap();

    x86_64::instructions::interrupts::without_interrupts(|| {
        let mut table = PROCESS_TABLE.lock();
        if let Some(table) = table.as_mut() {
            table.set_state(pid, crate::task::process::ProcessState::Sleeping);
        }
    });

    // Halt until the next tick preempts us onto some other ready thread;
    // loop until our own wake tick has actually passed.
    loop {
        x86_64::instructions::hlt();
        if crate::interrupts::TICK_COUNT.load(Ordering::Relaxed) >= wake_tick {
            break;
        }
    }

    x86_64::instructions::interrupts::without_interrupts(|| {
        let mut table = PROCESS_TABLE.lock();
        if let Some(table) = table.as_mut() {
            table.set_state(pid, crate::task::process::ProcessState::Ready);
        }
    });
}

// --- Demo thread entry functions ---

/// A thread that prints messages with sleep pauses. Used by `tspawn`.
pub fn demo_thread_entry(arg: u64) {
    let count = arg as u32;

    let (_pid, name) = x86_64::instructions::interrupts::without_interrupts(|| {
        let guard = SCHEDULER.lock();
        guard
            .as_ref()
            .map(|s| {
                let pid = s.current.as_u64();
                let name = s
                    .threads
                    .get(&s.current)
                    .map(|r| r.name.clone())
                    .unwrap_or_else(|| String::from("?"));
                (pid, name)
            })
            .unwrap_or((0, String::from("?")))
    });

    for i in 1..=count {
        crate::serial_println!("[T:{}] tick {}/{}", name, i, count);
        crate::println!("[T:{}] tick {}/{}", name, i, count);
        sleep_ms(500);
    }
    crate::serial_println!("[T:{}] finished", name);
    crate::println!("[T:{}] finished", name);
}

/// A thread that sleeps for a given duration. Used by the `sleep` shell command.
pub fn sleep_thread_entry(arg: u64) {
    let ms = arg;
    crate::serial_println!("[sleep] sleeping for {}ms", ms);
    crate::println!("[sleep] sleeping for {}ms", ms);
    sleep_ms(ms);
    crate::serial_println!("[sleep] woke up after {}ms", ms);
    crate::println!("[sleep] woke up after {}ms", ms);
}
