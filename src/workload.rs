// Dummy workload synthesis for the MCOS emulator.
//
// Auto-created (and `screen -s`) processes draw their programs from a small
// template pool; `%ADDR%` placeholders get a random in-range address so the
// WRITE/READ templates exercise demand paging across the whole allocation.

use rand::Rng;

use crate::instruction::{parser, Instruction};

const TEMPLATES: &[&str] = &[
    "DECLARE(x, 5)",
    "DECLARE(y, 10)",
    "ADD(sum, x, y)",
    "SUBTRACT(diff, y, x)",
    "PRINT('Hello world!')",
    "PRINT('Value of sum: ' + sum)",
    "SLEEP(2)",
    "FOR([PRINT('Hello world!')], 2)",
    "WRITE(%ADDR%, 42)",
    "READ(val, %ADDR%)",
    "PRINT('Loaded value: ' + val)",
];

/// Generate `count` random instructions for a process of `memory_size` bytes.
pub fn generate_program(count: usize, memory_size: usize) -> Vec<Instruction> {
    let mut rng = rand::thread_rng();
    let mut program = Vec::with_capacity(count);
    for _ in 0..count {
        let template = TEMPLATES[rng.gen_range(0..TEMPLATES.len())];
        let line = if template.contains("%ADDR%") {
            let addr = rng.gen_range(0..memory_size.max(1));
            template.replace("%ADDR%", &addr.to_string())
        } else {
            template.to_string()
        };
        match parser::parse_instruction(&line) {
            Ok(instruction) => program.push(instruction),
            Err(err) => log::error!("bad workload template '{line}': {err}"),
        }
    }
    program
}
