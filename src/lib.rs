// MCOS — a teaching emulator for a small multi-core operating system.
//
// An interactive console creates named processes that execute a tiny
// instruction set. A tick-driven scheduler multiplexes them across virtual
// CPU cores (round-robin or FCFS) while a demand-paged memory manager backs
// every process with a private address space over a shared pool of physical
// frames, evicting by global LRU into a backing store.

pub mod config;
pub mod engine;
pub mod instruction;
pub mod memory;
pub mod process;
pub mod scheduler;
pub mod snapshot;
pub mod workload;

#[cfg(test)]
mod tests;

pub use config::Config;
pub use engine::Engine;
pub use process::pcb::{Pid, ProcessState};
pub use scheduler::SchedulerPolicy;
