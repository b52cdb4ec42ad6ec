// Instruction interpreter for the MCOS emulator.
//
// Executes exactly one instruction of one process per call, on behalf of the
// scheduler (or a manual `step`). Variable reads and writes flow strictly
// downward through the memory manager; errors surface as state transitions
// on the owning process, never as aborts.

use crate::instruction::{clamp_u16, Instruction, Operand, PrintPart};
use crate::memory::{MemoryError, MemoryManager};
use crate::process::{ProcessState, ProcessTable};

/// How the program counter moves after a successful execution.
enum Step {
    /// Ordinary instruction: pc advances past it.
    Advance,
    /// SLEEP: pc advances, then the process yields for `ticks`.
    Sleep(u64),
    /// FOR: the instruction replaced itself in place; pc stays.
    Expanded,
}

/// Execute the instruction at `pc` of the process at table index `index`.
///
/// On a segmentation fault the process transitions to MEMORY_VIOLATED with
/// `pc` unchanged; on any other access failure it stays RUNNING for retry.
pub fn execute_current(
    table: &mut ProcessTable,
    index: usize,
    memory: &MemoryManager,
    clock: u64,
) {
    let instruction = {
        let Some(proc) = table.get(index) else { return };
        match proc.instructions.get(proc.pc) {
            Some(instruction) => instruction.clone(),
            None => return,
        }
    };

    let result = exec_one(table, index, memory, clock, &instruction);

    let Some(proc) = table.get_mut(index) else { return };
    match result {
        Ok(Step::Advance) => proc.pc += 1,
        Ok(Step::Expanded) => {}
        Ok(Step::Sleep(ticks)) => {
            proc.pc += 1;
            // SLEEP(0) is a no-op: Sleeping requires a positive counter.
            if ticks > 0 {
                proc.sleep_counter = ticks;
                proc.state = ProcessState::Sleeping;
            }
        }
        Err(MemoryError::SegmentationFault { pid, addr }) => {
            proc.state = ProcessState::MemoryViolated;
            log::warn!(
                "process {} (pid {pid}) memory violation at {addr:#x}",
                proc.name
            );
        }
        Err(err) => {
            log::error!("process {} access failed, retrying next tick: {err}", proc.name);
        }
    }
}

fn exec_one(
    table: &mut ProcessTable,
    index: usize,
    memory: &MemoryManager,
    clock: u64,
    instruction: &Instruction,
) -> Result<Step, MemoryError> {
    match instruction {
        Instruction::Declare { var, value } => {
            store_variable(table, index, memory, clock, var, clamp_u16(*value))?;
            Ok(Step::Advance)
        }
        Instruction::Add { dst, lhs, rhs } => {
            let a = resolve(table, index, memory, clock, lhs)? as i64;
            let b = resolve(table, index, memory, clock, rhs)? as i64;
            store_variable(table, index, memory, clock, dst, clamp_u16(a + b))?;
            Ok(Step::Advance)
        }
        Instruction::Subtract { dst, lhs, rhs } => {
            let a = resolve(table, index, memory, clock, lhs)? as i64;
            let b = resolve(table, index, memory, clock, rhs)? as i64;
            store_variable(table, index, memory, clock, dst, clamp_u16(a - b))?;
            Ok(Step::Advance)
        }
        Instruction::Print { parts } => {
            let mut out = String::new();
            for part in parts {
                match part {
                    PrintPart::Literal(text) => out.push_str(text),
                    PrintPart::Value(operand) => {
                        let value = resolve(table, index, memory, clock, operand)?;
                        out.push_str(&value.to_string());
                    }
                }
            }
            if let Some(proc) = table.get_mut(index) {
                proc.logs.push(out);
            }
            Ok(Step::Advance)
        }
        Instruction::Sleep { ticks } => Ok(Step::Sleep(*ticks)),
        Instruction::For { body, repeats } => {
            let mut expansion = Vec::with_capacity(body.len() * *repeats as usize);
            for _ in 0..*repeats {
                expansion.extend(body.iter().cloned());
            }
            if let Some(proc) = table.get_mut(index) {
                let pc = proc.pc;
                proc.instructions.splice(pc..pc + 1, expansion);
            }
            Ok(Step::Expanded)
        }
        Instruction::Write { addr, value } => {
            // The value token resolves first and may itself touch memory.
            let value = resolve(table, index, memory, clock, value)?;
            let pid = match table.get(index) {
                Some(proc) => proc.pid,
                None => return Ok(Step::Advance),
            };
            memory.write_word(table, pid, *addr, value, clock)?;
            Ok(Step::Advance)
        }
        Instruction::Read { var, addr } => {
            let pid = match table.get(index) {
                Some(proc) => proc.pid,
                None => return Ok(Step::Advance),
            };
            let value = memory.read_word(table, pid, *addr, clock)?;
            store_variable(table, index, memory, clock, var, value)?;
            Ok(Step::Advance)
        }
    }
}

/// Resolve a value token: a literal, or a variable read through the memory
/// manager. A variable never declared reads as zero without allocating.
fn resolve(
    table: &mut ProcessTable,
    index: usize,
    memory: &MemoryManager,
    clock: u64,
    operand: &Operand,
) -> Result<u16, MemoryError> {
    match operand {
        Operand::Literal(value) => Ok(clamp_u16(*value)),
        Operand::Var(name) => {
            let (pid, addr) = match table.get(index) {
                Some(proc) => (proc.pid, proc.symbol_table.get(name).copied()),
                None => return Ok(0),
            };
            match addr {
                Some(addr) => memory.read_word(table, pid, addr, clock),
                None => Ok(0),
            }
        }
    }
}

/// Write a variable, allocating its page-0 address on first use. The symbol
/// cursor advances two bytes per new variable (16-bit words).
fn store_variable(
    table: &mut ProcessTable,
    index: usize,
    memory: &MemoryManager,
    clock: u64,
    name: &str,
    value: u16,
) -> Result<(), MemoryError> {
    let (pid, addr) = {
        let Some(proc) = table.get_mut(index) else { return Ok(()) };
        let addr = match proc.symbol_table.get(name) {
            Some(&addr) => addr,
            None => {
                let addr = proc.symbol_cursor;
                proc.symbol_table.insert(name.to_string(), addr);
                proc.symbol_cursor += 2;
                addr
            }
        };
        (proc.pid, addr)
    };
    memory.write_word(table, pid, addr, value, clock)
}
