// MCOS interactive console.
//
// Thin I/O over the engine: every command either mutates through the
// command API or formats an immutable snapshot. The scheduler itself runs
// on the engine's driver thread.

use std::fs::File;
use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};

use mcos::engine::Engine;
use mcos::snapshot::{ProcessRow, ProcessSnapshot, SystemSnapshot};
use mcos::{Config, ProcessState, SchedulerPolicy};

const CONFIG_FILE: &str = "config.txt";
const REPORT_FILE: &str = "mcos-log.txt";

enum ConsoleMode {
    Main,
    /// Attached to a process screen.
    Process(String),
}

fn main() -> Result<()> {
    env_logger::init();

    println!("Welcome to MCOS!");
    println!("Type 'help' for available commands.\n");

    let stdin = io::stdin();
    let mut engine: Option<Engine> = None;
    let mut mode = ConsoleMode::Main;

    loop {
        match &mode {
            ConsoleMode::Main => print!("MCOS> "),
            ConsoleMode::Process(name) => print!("{name}> "),
        }
        io::stdout().flush().context("flushing prompt")?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input).context("reading command")? == 0 {
            break; // EOF
        }
        let tokens = tokenize(&input);
        if tokens.is_empty() {
            continue;
        }

        match &mode {
            ConsoleMode::Main => match tokens[0].as_str() {
                "help" => print_help(),
                "initialize" => initialize(&mut engine),
                "screen" => screen_command(engine.as_ref(), &tokens, &mut mode),
                "scheduler" => scheduler_command(engine.as_ref(), &tokens),
                "report-util" => {
                    if let Some(engine) = require(engine.as_ref()) {
                        report_util(engine)?;
                    }
                }
                "vmstat" => {
                    if let Some(engine) = require(engine.as_ref()) {
                        print_vmstat(engine);
                    }
                }
                "process-smi" => {
                    if let Some(engine) = require(engine.as_ref()) {
                        print_global_smi(engine);
                    }
                }
                "exit" => break,
                other => println!("Unknown command '{other}'. Type 'help'."),
            },
            ConsoleMode::Process(name) => match tokens[0].as_str() {
                "process-smi" => {
                    if let Some(engine) = require(engine.as_ref()) {
                        match engine.find_process(name) {
                            Some(snapshot) => print_process_smi(engine, &snapshot),
                            None => println!("Error: process {name} not found."),
                        }
                    }
                }
                "step" => {
                    if let Some(engine) = require(engine.as_ref()) {
                        match engine.step(name) {
                            Ok(pc) => println!("Executed instruction {pc} for process {name}."),
                            Err(err) => println!("Error: {err}"),
                        }
                    }
                }
                "exit" => {
                    println!("Exiting process screen...");
                    mode = ConsoleMode::Main;
                }
                _ => println!("Invalid command in process screen."),
            },
        }
    }

    if let Some(engine) = engine {
        engine.shutdown();
    }
    Ok(())
}

/// Split a command line on whitespace, keeping double-quoted spans together.
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in input.chars() {
        if c == '"' {
            in_quotes = !in_quotes;
            current.push(c);
        } else if c.is_whitespace() && !in_quotes {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
        } else {
            current.push(c);
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn require(engine: Option<&Engine>) -> Option<&Engine> {
    if engine.is_none() {
        println!("Error: system not initialized. Type 'initialize' first.");
    }
    engine
}

fn print_help() {
    println!("Available commands:");
    println!("  initialize                         - Load {CONFIG_FILE} and build the engine");
    println!("  screen -s <name> <memory>          - Create a process with a random program");
    println!("  screen -c <name> <memory> \"<prog>\" - Create a process from instructions");
    println!("  screen -r <name>                   - Reattach to a process screen");
    println!("  screen -ls                         - List processes and core usage");
    println!("  scheduler start                    - Begin automatic process creation");
    println!("  scheduler stop                     - Stop automatic process creation");
    println!("  report-util                        - CPU report, also saved to {REPORT_FILE}");
    println!("  process-smi                        - Global process and memory table");
    println!("  vmstat                             - Memory and paging counters");
    println!("  exit                               - Quit");
}

fn initialize(engine: &mut Option<Engine>) {
    if engine.is_some() {
        println!("System already initialized.");
        return;
    }
    println!("Initializing system from {CONFIG_FILE}...");
    let config = match Config::load(CONFIG_FILE) {
        Ok(config) => config,
        Err(err) => {
            println!("Initialization failed: {err}");
            return;
        }
    };

    println!("Configuration loaded:");
    println!("  num-cpu: {}", config.num_cpu);
    println!("  scheduler: {}", config.scheduler);
    println!("  quantum-cycles: {}", config.quantum_cycles);
    println!("  batch-process-freq: {}", config.batch_process_freq);
    println!("  instruction range: {}-{}", config.min_ins, config.max_ins);
    println!("  delays-per-exec: {}", config.delays_per_exec);
    println!(
        "  memory: {} bytes ({} frames x {} bytes)",
        config.max_overall_mem,
        config.total_frames(),
        config.mem_per_frame
    );

    match Engine::new(config) {
        Ok(built) => {
            *engine = Some(built);
            println!("System initialization complete.\n");
        }
        Err(err) => println!("Initialization failed: {err}"),
    }
}

fn screen_command(engine: Option<&Engine>, tokens: &[String], mode: &mut ConsoleMode) {
    let Some(engine) = require(engine) else { return };
    if tokens.len() == 1 {
        println!("Usage:");
        println!("  screen -s <process_name> <memory>");
        println!("  screen -c <process_name> <memory> \"<instructions>\"");
        println!("  screen -r <process_name>");
        println!("  screen -ls");
        return;
    }

    match tokens[1].as_str() {
        "-s" if tokens.len() == 4 => {
            let name = &tokens[2];
            let Some(memory) = parse_memory(&tokens[3]) else { return };
            match engine.create_process(name, memory) {
                Ok(pid) => {
                    println!("Created new process: {name} (PID {pid}) with {memory} bytes.");
                    println!("Attached to process screen.");
                    engine.ensure_driver();
                    *mode = ConsoleMode::Process(name.clone());
                }
                Err(err) => println!("Error: {err}"),
            }
        }
        "-c" if tokens.len() == 5 => {
            let name = &tokens[2];
            let Some(memory) = parse_memory(&tokens[3]) else { return };
            let program = tokens[4].trim_matches('"');
            match engine.create_process_with(name, memory, program) {
                Ok(pid) => {
                    println!("Created new process: {name} (PID {pid}) with {memory} bytes.");
                    println!("Attached to process screen.");
                    engine.ensure_driver();
                    *mode = ConsoleMode::Process(name.clone());
                }
                Err(err) => println!("Error: {err}"),
            }
        }
        "-r" if tokens.len() >= 3 => {
            let name = &tokens[2];
            match engine.find_process(name) {
                None => println!("Process {name} not found."),
                Some(snapshot) if snapshot.state == ProcessState::Finished => {
                    println!("Process {name} already finished.");
                }
                Some(snapshot) => {
                    println!("Reattached to process {name} (PID {})", snapshot.pid);
                    *mode = ConsoleMode::Process(name.clone());
                }
            }
        }
        "-ls" => print_listing(engine),
        _ => println!("Invalid screen command."),
    }
}

fn parse_memory(token: &str) -> Option<usize> {
    match token.parse() {
        Ok(memory) => Some(memory),
        Err(_) => {
            println!("Error: invalid memory argument, must be an integer.");
            None
        }
    }
}

fn scheduler_command(engine: Option<&Engine>, tokens: &[String]) {
    let Some(engine) = require(engine) else { return };
    match tokens.get(1).map(String::as_str) {
        Some("start") => {
            if engine.auto_create_enabled() {
                println!("Auto-creation is already running.");
            } else {
                engine.start_auto_create();
                println!(
                    "Auto-creation started: one process every {} tick(s).",
                    engine.config().batch_process_freq
                );
            }
            engine.ensure_driver();
        }
        Some("stop") => {
            if engine.auto_create_enabled() {
                engine.stop_auto_create();
                println!("Auto-creation stopped.");
            } else {
                println!("Auto-creation is not running.");
            }
        }
        _ => println!("Usage: scheduler start | scheduler stop"),
    }
}

fn print_listing(engine: &Engine) {
    let snapshot = engine.list_snapshot();
    if snapshot.processes.is_empty() {
        println!("No processes created.");
        return;
    }

    println!("\n=== CPU SUMMARY ===");
    println!("CPU Utilization: {:.1}%", snapshot.cpu_utilization * 100.0);
    println!("Cores Used: {}/{}", snapshot.running, snapshot.num_cpu);
    println!("Cores Available: {}", snapshot.num_cpu.saturating_sub(snapshot.running));
    println!(
        "Ready: {} | Sleeping: {} | Finished: {} | Violated: {}",
        snapshot.ready, snapshot.sleeping, snapshot.finished, snapshot.violated
    );

    println!("\n=== PROCESS TABLE ===");
    for row in &snapshot.processes {
        if matches!(row.state, ProcessState::Running | ProcessState::Sleeping) {
            println!(
                "  {} [PID {}] - {} ({}/{})",
                row.name, row.pid, row.state, row.pc, row.instruction_count
            );
        }
    }
    for row in upcoming_ready(engine, &snapshot) {
        println!(
            "  {} [PID {}] - READY ({}/{})",
            row.name, row.pid, row.pc, row.instruction_count
        );
    }

    let mut printed_header = false;
    for row in &snapshot.processes {
        if row.state.is_terminal() {
            if !printed_header {
                println!("\n=== COMPLETED PROCESSES ===");
                printed_header = true;
            }
            println!(
                "  {} [PID {}] - {} ({}/{})",
                row.name, row.pid, row.state, row.pc, row.instruction_count
            );
        }
    }
    println!("=====================\n");
}

/// The next few READY processes in actual dispatch order.
fn upcoming_ready<'a>(engine: &Engine, snapshot: &'a SystemSnapshot) -> Vec<&'a ProcessRow> {
    let count = snapshot.processes.len();
    let mut upcoming = Vec::new();
    let order: Box<dyn Iterator<Item = usize>> = match engine.config().scheduler {
        SchedulerPolicy::RoundRobin => {
            Box::new((0..count).map(move |offset| (snapshot.rr_cursor + offset) % count))
        }
        SchedulerPolicy::Fcfs => Box::new(0..count),
    };
    for index in order {
        if snapshot.processes[index].state == ProcessState::Ready {
            upcoming.push(&snapshot.processes[index]);
            if upcoming.len() >= 4 {
                break;
            }
        }
    }
    upcoming
}

fn report_util(engine: &Engine) -> Result<()> {
    let snapshot = engine.list_snapshot();

    println!("\n=== CPU UTILIZATION REPORT ===");
    println!("CPU Utilization: {:.1}%", snapshot.cpu_utilization * 100.0);
    println!("Cores Used: {}/{}", snapshot.running, snapshot.num_cpu);
    println!(
        "Ready: {} | Sleeping: {} | Finished: {} | Violated: {}",
        snapshot.ready, snapshot.sleeping, snapshot.finished, snapshot.violated
    );
    for row in &snapshot.processes {
        println!(
            "  {} [PID {}] - {} ({}/{})",
            row.name, row.pid, row.state, row.pc, row.instruction_count
        );
    }
    println!("===============================");

    let mut log = File::create(REPORT_FILE).with_context(|| format!("creating {REPORT_FILE}"))?;
    writeln!(log, "=== MCOS CPU UTILIZATION REPORT ===")?;
    writeln!(log, "Tick: {}", snapshot.clock)?;
    writeln!(log, "CPU Utilization: {:.1}%", snapshot.cpu_utilization * 100.0)?;
    writeln!(log, "Cores Used: {}/{}", snapshot.running, snapshot.num_cpu)?;
    for row in &snapshot.processes {
        writeln!(
            log,
            "  {} [PID {}] - {} ({}/{})",
            row.name, row.pid, row.state, row.pc, row.instruction_count
        )?;
    }
    println!("Report saved to {REPORT_FILE}\n");
    Ok(())
}

fn print_vmstat(engine: &Engine) {
    let stat = engine.vmstat();
    println!("\n=== VMSTAT ===");
    println!("{} bytes total memory", stat.total_mem);
    println!("{} bytes used memory", stat.used_mem);
    println!("{} bytes free memory", stat.free_mem);
    println!("{} idle cpu ticks", stat.idle_cpu_ticks);
    println!("{} active cpu ticks", stat.active_cpu_ticks);
    println!("{} pages paged in", stat.pages_paged_in);
    println!("{} pages paged out", stat.pages_paged_out);
    println!("=================\n");
}

fn print_global_smi(engine: &Engine) {
    let snapshot = engine.list_snapshot();
    let stat = engine.vmstat();

    println!("\n=== PROCESS-SMI ===");
    println!("CPU Utilization: {:.1}%", snapshot.cpu_utilization * 100.0);
    println!("Total Memory: {} bytes", stat.total_mem);
    println!("Used Memory:  {} bytes", stat.used_mem);
    println!("Free Memory:  {} bytes", stat.free_mem);

    if snapshot.processes.is_empty() {
        println!("No processes found.");
        println!("===================\n");
        return;
    }

    let mut rows: Vec<_> = snapshot.processes.iter().collect();
    rows.sort_by(|a, b| b.ram_used.cmp(&a.ram_used));

    println!(
        "{:<12} {:<6} {:<16} {:<9} {:<7} {:<9} {:<7} {:<9}",
        "Name", "PID", "State", "MemReq", "Pages", "Resident", "Dirty", "RAM Used"
    );
    for row in rows {
        println!(
            "{:<12} {:<6} {:<16} {:<9} {:<7} {:<9} {:<7} {:<9}",
            row.name,
            row.pid,
            row.state.to_string(),
            row.memory_required,
            row.total_pages,
            row.resident_pages,
            row.dirty_pages,
            row.ram_used
        );
    }
    println!("===================\n");
}

fn print_process_smi(engine: &Engine, snapshot: &ProcessSnapshot) {
    println!("\n=== Process SMI ===");
    println!("Name: {}", snapshot.name);
    println!("PID: {}", snapshot.pid);
    println!("State: {}", snapshot.state);
    println!("Instruction progress: {} / {}", snapshot.pc, snapshot.instruction_count);

    if snapshot.variables.is_empty() {
        println!("Variables: (none)");
    } else {
        println!("Variables (stored in page 0):");
        for variable in &snapshot.variables {
            match variable.value {
                Some(value) => {
                    println!("  {} @ address {} = {}", variable.name, variable.address, value)
                }
                None => {
                    println!("  {} @ address {} = [Swapped Out]", variable.name, variable.address)
                }
            }
        }
    }

    if snapshot.logs.is_empty() {
        println!("Logs: (none)");
    } else {
        println!("Logs:");
        for line in &snapshot.logs {
            println!("  {line}");
        }
    }

    if snapshot.state == ProcessState::Finished {
        println!("Process has finished execution.");
    }

    println!("\n--- Page Table ---");
    println!("Total Frames: {}", engine.config().total_frames());
    println!("Page | Frame | Valid | Dirty | Last Accessed");
    for row in &snapshot.page_table {
        println!(
            "  {:<4} | {:<5} | {:<5} | {:<5} | {}",
            row.page,
            row.frame_num.map_or("-".to_string(), |f| f.to_string()),
            if row.valid { "yes" } else { "no" },
            if row.dirty { "yes" } else { "no" },
            row.last_accessed
        );
    }
    println!("=====================\n");
}
