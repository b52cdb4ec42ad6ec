// Snapshot views for the MCOS emulator.
//
// Everything the external command surface sees is an immutable copy taken
// under the scheduler lock; nothing here hands out references into live
// state. Variable values are peeked without disturbing LRU stamps, so
// inspecting a process never changes what the pager will do next.

use crate::memory::MemoryManager;
use crate::process::{Pid, ProcessState, ProcessTable};
use crate::scheduler::SchedState;

/// One symbol-table entry with its current value, or `None` when the backing
/// page is swapped out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableView {
    pub name: String,
    pub address: usize,
    pub value: Option<u16>,
}

/// One page-table row of a process snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableRow {
    pub page: usize,
    pub frame_num: Option<usize>,
    pub valid: bool,
    pub dirty: bool,
    pub last_accessed: u64,
}

/// Detailed view of one process (`screen -r` / per-process `process-smi`).
#[derive(Debug, Clone)]
pub struct ProcessSnapshot {
    pub pid: Pid,
    pub name: String,
    pub state: ProcessState,
    pub pc: usize,
    pub instruction_count: usize,
    pub memory_required: usize,
    pub logs: Vec<String>,
    pub variables: Vec<VariableView>,
    pub page_table: Vec<PageTableRow>,
    pub resident_pages: usize,
    pub dirty_pages: usize,
}

impl ProcessSnapshot {
    pub fn capture(table: &ProcessTable, pid: Pid, memory: &MemoryManager) -> Option<Self> {
        let proc = table.by_pid(pid)?;
        let variables = proc
            .symbol_table
            .iter()
            .map(|(name, &address)| VariableView {
                name: name.clone(),
                address,
                value: memory.peek_word(table, pid, address),
            })
            .collect();
        let page_table = proc
            .page_table
            .iter()
            .map(|(&page, entry)| PageTableRow {
                page,
                frame_num: entry.frame_num,
                valid: entry.valid,
                dirty: entry.dirty,
                last_accessed: entry.last_accessed,
            })
            .collect();
        Some(Self {
            pid,
            name: proc.name.clone(),
            state: proc.state,
            pc: proc.pc,
            instruction_count: proc.instructions.len(),
            memory_required: proc.memory_required,
            logs: proc.logs.clone(),
            variables,
            page_table,
            resident_pages: proc.resident_pages(),
            dirty_pages: proc.dirty_pages(),
        })
    }
}

/// One row of the system-wide process listing.
#[derive(Debug, Clone)]
pub struct ProcessRow {
    pub pid: Pid,
    pub name: String,
    pub state: ProcessState,
    pub pc: usize,
    pub instruction_count: usize,
    pub memory_required: usize,
    pub total_pages: usize,
    pub resident_pages: usize,
    pub dirty_pages: usize,
    pub ram_used: usize,
}

/// System-wide view (`screen -ls`, `report-util`, global `process-smi`).
#[derive(Debug, Clone)]
pub struct SystemSnapshot {
    pub clock: u64,
    pub num_cpu: usize,
    pub running: usize,
    pub ready: usize,
    pub sleeping: usize,
    pub finished: usize,
    pub violated: usize,
    /// `running / num_cpu`, in `[0, 1]`.
    pub cpu_utilization: f32,
    pub rr_cursor: usize,
    pub processes: Vec<ProcessRow>,
}

impl SystemSnapshot {
    pub fn capture(sched: &SchedState, num_cpu: usize, frame_size: usize) -> Self {
        let table = &sched.table;
        let running = table.count_state(ProcessState::Running);
        let processes = table
            .iter()
            .map(|proc| {
                let resident = proc.resident_pages();
                ProcessRow {
                    pid: proc.pid,
                    name: proc.name.clone(),
                    state: proc.state,
                    pc: proc.pc,
                    instruction_count: proc.instructions.len(),
                    memory_required: proc.memory_required,
                    total_pages: proc.page_table.len(),
                    resident_pages: resident,
                    dirty_pages: proc.dirty_pages(),
                    ram_used: resident * frame_size,
                }
            })
            .collect();
        Self {
            clock: sched.clock,
            num_cpu,
            running,
            ready: table.count_state(ProcessState::Ready),
            sleeping: table.count_state(ProcessState::Sleeping),
            finished: table.count_state(ProcessState::Finished),
            violated: table.count_state(ProcessState::MemoryViolated),
            cpu_utilization: if num_cpu > 0 { running as f32 / num_cpu as f32 } else { 0.0 },
            rr_cursor: if table.is_empty() { 0 } else { sched.rr_cursor % table.len() },
            processes,
        }
    }
}

/// Paging and CPU counters (`vmstat`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmStat {
    pub total_mem: usize,
    pub used_mem: usize,
    pub free_mem: usize,
    pub idle_cpu_ticks: u64,
    pub active_cpu_ticks: u64,
    pub pages_paged_in: u64,
    pub pages_paged_out: u64,
}
