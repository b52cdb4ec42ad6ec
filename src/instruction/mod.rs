// Instruction set for the MCOS emulator.
//
// The eight instruction kinds are a closed tagged enum; execution lives in
// `interpreter`, the textual form in `parser`. `Display` renders the
// parenthesized form back out for traces and inspectors.

pub mod interpreter;
pub mod parser;

use std::fmt;

pub use parser::{parse_instruction, parse_program, ParseError};

/// A value-position token: a decimal literal or a variable name resolved
/// through the memory manager at execution time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Literal(i64),
    Var(String),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Literal(value) => write!(f, "{value}"),
            Operand::Var(name) => f.write_str(name),
        }
    }
}

/// One segment of a PRINT expression, split on top-level `+`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrintPart {
    /// A single-quoted literal, quotes stripped.
    Literal(String),
    /// A value token rendered in decimal.
    Value(Operand),
}

/// A decoded instruction. Parsed once at process creation; a running process
/// never sees unparseable text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Declare { var: String, value: i64 },
    Add { dst: String, lhs: Operand, rhs: Operand },
    Subtract { dst: String, lhs: Operand, rhs: Operand },
    Print { parts: Vec<PrintPart> },
    Sleep { ticks: u64 },
    For { body: Vec<Instruction>, repeats: u32 },
    Write { addr: usize, value: Operand },
    Read { var: String, addr: usize },
}

/// Clamp an intermediate result into the stored 16-bit range.
pub fn clamp_u16(value: i64) -> u16 {
    value.clamp(0, u16::MAX as i64) as u16
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Declare { var, value } => write!(f, "DECLARE({var}, {value})"),
            Instruction::Add { dst, lhs, rhs } => write!(f, "ADD({dst}, {lhs}, {rhs})"),
            Instruction::Subtract { dst, lhs, rhs } => {
                write!(f, "SUBTRACT({dst}, {lhs}, {rhs})")
            }
            Instruction::Print { parts } => {
                write!(f, "PRINT(")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, " + ")?;
                    }
                    match part {
                        PrintPart::Literal(text) => write!(f, "'{text}'")?,
                        PrintPart::Value(operand) => write!(f, "{operand}")?,
                    }
                }
                write!(f, ")")
            }
            Instruction::Sleep { ticks } => write!(f, "SLEEP({ticks})"),
            Instruction::For { body, repeats } => {
                write!(f, "FOR([")?;
                for (i, instruction) in body.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{instruction}")?;
                }
                write!(f, "], {repeats})")
            }
            Instruction::Write { addr, value } => write!(f, "WRITE({addr}, {value})"),
            Instruction::Read { var, addr } => write!(f, "READ({var}, {addr})"),
        }
    }
}
