// Process table for the MCOS emulator.
//
// Processes live in a stable index-addressable container; everything else in
// the system refers to them by pid and resolves through this table under the
// scheduler lock. Table order is creation order, which drives FCFS dispatch
// and the round-robin cursor. Processes are never removed during a run and
// pids are never reused.

use crate::instruction::Instruction;
use crate::process::pcb::{Pid, Process, ProcessState};

/// The set of all processes plus pid allocation.
#[derive(Debug, Default)]
pub struct ProcessTable {
    processes: Vec<Process>,
    next_pid: Pid,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self { processes: Vec::new(), next_pid: 1 }
    }

    /// Create a process, assign it the next pid, and append it READY.
    ///
    /// Name uniqueness is the caller's responsibility (checked at the engine
    /// boundary so rejected creations never allocate a pid).
    pub fn spawn(
        &mut self,
        name: String,
        memory_required: usize,
        pages: usize,
        instructions: Vec<Instruction>,
    ) -> Pid {
        let pid = self.next_pid;
        self.next_pid += 1;
        self.processes.push(Process::new(pid, name, memory_required, pages, instructions));
        pid
    }

    /// The pid the next `spawn` will assign.
    pub fn peek_next_pid(&self) -> Pid {
        self.next_pid
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Process> {
        self.processes.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Process> {
        self.processes.get_mut(index)
    }

    pub fn by_pid(&self, pid: Pid) -> Option<&Process> {
        self.processes.iter().find(|p| p.pid == pid)
    }

    pub fn by_pid_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.processes.iter_mut().find(|p| p.pid == pid)
    }

    pub fn by_name(&self, name: &str) -> Option<&Process> {
        self.processes.iter().find(|p| p.name == name)
    }

    pub fn by_name_mut(&mut self, name: &str) -> Option<&mut Process> {
        self.processes.iter_mut().find(|p| p.name == name)
    }

    pub fn index_of_pid(&self, pid: Pid) -> Option<usize> {
        self.processes.iter().position(|p| p.pid == pid)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.by_name(name).is_some()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Process> {
        self.processes.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Process> {
        self.processes.iter_mut()
    }

    pub fn count_state(&self, state: ProcessState) -> usize {
        self.processes.iter().filter(|p| p.state == state).count()
    }

    /// Any process still READY, RUNNING, or SLEEPING.
    pub fn any_active(&self) -> bool {
        self.processes.iter().any(|p| p.is_active())
    }

    /// Every process has reached a terminal state. Vacuously true when empty;
    /// the driver checks emptiness separately before halting.
    pub fn all_terminal(&self) -> bool {
        self.processes.iter().all(|p| p.state.is_terminal())
    }
}
