// Process management module for the MCOS emulator.
pub mod pcb;
pub mod table;

pub use pcb::{PageTableEntry, Pid, Process, ProcessState};
pub use table::ProcessTable;
