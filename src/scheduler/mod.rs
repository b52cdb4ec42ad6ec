// Multi-core scheduler for the MCOS emulator.
//
// A single driver executes a sequence of ticks; each tick advances every
// occupied core by at most one instruction. There is no per-core thread:
// cores are iterated in ascending id, so RAM and page-table mutations have a
// deterministic order for a given process table. The whole tick runs under
// the scheduler lock held by the caller; wall-clock pacing happens outside.

use std::fmt;

use rand::Rng;

use crate::config::Config;
use crate::instruction::interpreter;
use crate::memory::MemoryManager;
use crate::process::{Pid, ProcessState, ProcessTable};
use crate::workload;

/// Dispatch policy selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPolicy {
    /// Preemptive round-robin with a fixed quantum.
    RoundRobin,
    /// First-come-first-served; a process keeps its core until it sleeps,
    /// violates memory, or finishes.
    Fcfs,
}

impl SchedulerPolicy {
    /// Parse a config value, case-insensitively. `None` for unknown names.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "rr" => Some(SchedulerPolicy::RoundRobin),
            "fcfs" => Some(SchedulerPolicy::Fcfs),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SchedulerPolicy::RoundRobin => "rr",
            SchedulerPolicy::Fcfs => "fcfs",
        }
    }
}

impl fmt::Display for SchedulerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One virtual CPU core.
#[derive(Debug, Clone)]
pub struct CpuCore {
    pub id: usize,
    /// Pid of the process running here, resolved through the table.
    pub running: Option<Pid>,
    /// Ticks remaining in the current quantum; meaningful under RR only.
    pub quantum_left: u32,
}

/// Everything the scheduler lock guards: the clock, the process table, the
/// cores, the round-robin cursor, and the utilization counters.
#[derive(Debug)]
pub struct SchedState {
    pub clock: u64,
    pub table: ProcessTable,
    pub cores: Vec<CpuCore>,
    pub rr_cursor: usize,
    pub active_cpu_ticks: u64,
    pub idle_cpu_ticks: u64,
    last_batch_tick: u64,
}

impl SchedState {
    pub fn new(num_cpu: usize) -> Self {
        Self {
            clock: 0,
            table: ProcessTable::new(),
            cores: (0..num_cpu)
                .map(|id| CpuCore { id, running: None, quantum_left: 0 })
                .collect(),
            rr_cursor: 0,
            active_cpu_ticks: 0,
            idle_cpu_ticks: 0,
            last_batch_tick: 0,
        }
    }
}

/// Run one scheduler tick: advance the clock, wake sleepers, reap cores,
/// dispatch, execute one instruction per occupied core, apply post-execute
/// transitions, re-dispatch released cores, and optionally batch-create.
pub fn tick(state: &mut SchedState, memory: &MemoryManager, config: &Config, auto_create: bool) {
    state.clock += 1;

    wake_sleepers(state);
    reap_cores(state);
    dispatch_idle_cores(state, config);

    // A core counts as active if it entered the execute phase occupied.
    let occupied = state.cores.iter().filter(|core| core.running.is_some()).count();
    state.active_cpu_ticks += occupied as u64;
    state.idle_cpu_ticks += (state.cores.len() - occupied) as u64;

    if execute_cores(state, memory, config) {
        dispatch_idle_cores(state, config);
    }

    if auto_create {
        maybe_auto_create(state, config);
    }
}

/// Decrement every sleeper; a counter reaching zero wakes the process.
fn wake_sleepers(state: &mut SchedState) {
    for proc in state.table.iter_mut() {
        if proc.state == ProcessState::Sleeping && proc.sleep_counter > 0 {
            proc.sleep_counter -= 1;
            if proc.sleep_counter == 0 {
                proc.state = ProcessState::Ready;
            }
        }
    }
}

/// Free cores whose process is gone or terminal.
fn reap_cores(state: &mut SchedState) {
    for core_index in 0..state.cores.len() {
        let Some(pid) = state.cores[core_index].running else { continue };
        let stale = match state.table.by_pid(pid) {
            Some(proc) => proc.state.is_terminal(),
            None => true,
        };
        if stale {
            state.cores[core_index].running = None;
        }
    }
}

/// Hand each idle core a READY process according to the dispatch policy.
fn dispatch_idle_cores(state: &mut SchedState, config: &Config) {
    for core_index in 0..state.cores.len() {
        if state.cores[core_index].running.is_some() {
            continue;
        }
        let count = state.table.len();
        if count == 0 {
            state.rr_cursor = 0;
            continue;
        }
        if state.rr_cursor >= count {
            state.rr_cursor %= count;
        }

        let chosen = match config.scheduler {
            SchedulerPolicy::RoundRobin => (0..count)
                .map(|offset| (state.rr_cursor + offset) % count)
                .find(|&i| state.table.get(i).map(|p| p.state) == Some(ProcessState::Ready)),
            SchedulerPolicy::Fcfs => (0..count)
                .find(|&i| state.table.get(i).map(|p| p.state) == Some(ProcessState::Ready)),
        };

        let Some(index) = chosen else { continue };
        if config.scheduler == SchedulerPolicy::RoundRobin {
            state.rr_cursor = (index + 1) % count;
        }
        if let Some(proc) = state.table.get_mut(index) {
            proc.state = ProcessState::Running;
            state.cores[core_index].running = Some(proc.pid);
            state.cores[core_index].quantum_left = match config.scheduler {
                SchedulerPolicy::RoundRobin => config.quantum_cycles,
                SchedulerPolicy::Fcfs => 0,
            };
            log::debug!(
                "[tick {}] core {} <- {} (pid {})",
                state.clock,
                core_index,
                proc.name,
                proc.pid
            );
        }
    }
}

/// Execute one instruction on every occupied core and apply the post-execute
/// transitions. Returns whether any core was released.
fn execute_cores(state: &mut SchedState, memory: &MemoryManager, config: &Config) -> bool {
    let rr = config.scheduler == SchedulerPolicy::RoundRobin;
    let mut released = false;

    for core_index in 0..state.cores.len() {
        let Some(pid) = state.cores[core_index].running else { continue };
        let Some(index) = state.table.index_of_pid(pid) else {
            state.cores[core_index].running = None;
            released = true;
            continue;
        };
        if state.table.get(index).map(|p| p.state) != Some(ProcessState::Running) {
            continue;
        }

        // A process dispatched at the end of its program finishes here
        // without consuming an instruction.
        let at_end = state
            .table
            .get(index)
            .map_or(true, |p| p.pc >= p.instructions.len());
        if at_end {
            if let Some(proc) = state.table.get_mut(index) {
                proc.state = ProcessState::Finished;
                log::info!("process {} (pid {pid}) finished", proc.name);
            }
            state.cores[core_index].running = None;
            released = true;
            continue;
        }

        if log::log_enabled!(log::Level::Trace) {
            if let Some(proc) = state.table.get(index) {
                log::trace!(
                    "[tick {}] {} [pid {}] pc={}/{} -> {}",
                    state.clock,
                    proc.name,
                    proc.pid,
                    proc.pc,
                    proc.instructions.len(),
                    proc.instructions[proc.pc]
                );
            }
        }

        interpreter::execute_current(&mut state.table, index, memory, state.clock);
        if rr {
            let quantum = state.cores[core_index].quantum_left;
            state.cores[core_index].quantum_left = quantum.saturating_sub(1);
        }

        let (proc_state, at_end) = match state.table.get(index) {
            Some(proc) => (proc.state, proc.pc >= proc.instructions.len()),
            None => continue,
        };
        match proc_state {
            ProcessState::Finished | ProcessState::MemoryViolated | ProcessState::Sleeping => {
                state.cores[core_index].running = None;
                released = true;
            }
            ProcessState::Running if at_end => {
                if let Some(proc) = state.table.get_mut(index) {
                    proc.state = ProcessState::Finished;
                    log::info!("process {} (pid {pid}) finished", proc.name);
                }
                state.cores[core_index].running = None;
                released = true;
            }
            ProcessState::Running if rr && state.cores[core_index].quantum_left == 0 => {
                let has_other_ready = state
                    .table
                    .iter()
                    .any(|p| p.state == ProcessState::Ready && p.pid != pid);
                if has_other_ready {
                    if let Some(proc) = state.table.get_mut(index) {
                        proc.state = ProcessState::Ready;
                    }
                    state.cores[core_index].running = None;
                    released = true;
                    // Re-anchor the cursor just past the preempted process.
                    state.rr_cursor = (index + 1) % state.table.len();
                    log::debug!("[tick {}] preempted pid {pid} on quantum expiry", state.clock);
                } else {
                    state.cores[core_index].quantum_left = config.quantum_cycles;
                }
            }
            _ => {}
        }
    }

    released
}

/// Append one auto-created process on batch-frequency boundaries. The tick
/// check is authoritative; one creation per boundary.
fn maybe_auto_create(state: &mut SchedState, config: &Config) {
    if state.clock % config.batch_process_freq != 0 || state.last_batch_tick == state.clock {
        return;
    }

    let name = format!("auto_p{}", state.table.peek_next_pid());
    if state.table.contains_name(&name) {
        log::warn!("skipping auto-create, name {name} already taken");
        return;
    }

    let mut rng = rand::thread_rng();
    let count = rng.gen_range(config.min_ins..=config.max_ins);
    let memory_size = rng.gen_range(config.min_mem_per_proc..=config.max_mem_per_proc);
    let program = workload::generate_program(count, memory_size);
    let pid = state
        .table
        .spawn(name.clone(), memory_size, config.pages_for(memory_size), program);
    state.last_batch_tick = state.clock;
    log::info!(
        "[tick {}] auto-created {name} (pid {pid}, {memory_size} bytes, {count} instructions)",
        state.clock
    );
}
