// Process control block for the MCOS emulator.
use std::collections::BTreeMap;
use std::fmt;

use crate::instruction::Instruction;

/// Process ID type
pub type Pid = u32;

/// Process state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Ready to run, waiting for a core.
    Ready,
    /// Currently assigned to a core.
    Running,
    /// Waiting out a SLEEP instruction.
    Sleeping,
    /// Executed its last instruction. Terminal.
    Finished,
    /// Touched an address at or beyond its allocation. Terminal.
    MemoryViolated,
}

impl ProcessState {
    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessState::Finished | ProcessState::MemoryViolated)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessState::Ready => "READY",
            ProcessState::Running => "RUNNING",
            ProcessState::Sleeping => "SLEEPING",
            ProcessState::Finished => "FINISHED",
            ProcessState::MemoryViolated => "MEMORY_VIOLATED",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a process's page table.
///
/// `valid` holds exactly when `frame_num` is set; `last_accessed` carries the
/// clock tick of the most recent access and drives global LRU eviction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageTableEntry {
    pub frame_num: Option<usize>,
    pub valid: bool,
    pub dirty: bool,
    pub last_accessed: u64,
}

/// Process Control Block - per-process state owned by the process table.
#[derive(Debug, Clone)]
pub struct Process {
    pub pid: Pid,
    pub name: String,
    pub state: ProcessState,
    /// Zero-based index into `instructions`.
    pub pc: usize,
    /// Mutable only through FOR expansion at `pc`.
    pub instructions: Vec<Instruction>,
    /// Output produced by PRINT, in execution order.
    pub logs: Vec<String>,
    /// Ticks remaining before wake; positive exactly while Sleeping.
    pub sleep_counter: u64,
    /// Virtual address space size in bytes.
    pub memory_required: usize,
    /// Variable name to virtual address, all within page 0.
    pub symbol_table: BTreeMap<String, usize>,
    /// Next free virtual address for a new variable; advances 2 bytes per
    /// declaration (16-bit words).
    pub symbol_cursor: usize,
    pub page_table: BTreeMap<usize, PageTableEntry>,
}

impl Process {
    /// Create a READY process with an empty page table over `pages` pages.
    pub fn new(
        pid: Pid,
        name: String,
        memory_required: usize,
        pages: usize,
        instructions: Vec<Instruction>,
    ) -> Self {
        let mut page_table = BTreeMap::new();
        for page in 0..pages {
            page_table.insert(page, PageTableEntry::default());
        }
        Self {
            pid,
            name,
            state: ProcessState::Ready,
            pc: 0,
            instructions,
            logs: Vec::new(),
            sleep_counter: 0,
            memory_required,
            symbol_table: BTreeMap::new(),
            symbol_cursor: 0,
            page_table,
        }
    }

    /// Whether this process still wants scheduler attention.
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            ProcessState::Ready | ProcessState::Running | ProcessState::Sleeping
        )
    }

    /// Number of pages currently resident in RAM.
    pub fn resident_pages(&self) -> usize {
        self.page_table.values().filter(|entry| entry.valid).count()
    }

    /// Number of resident pages written since their last fault-in.
    pub fn dirty_pages(&self) -> usize {
        self.page_table.values().filter(|entry| entry.dirty).count()
    }
}
