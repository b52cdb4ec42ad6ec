// Engine for the MCOS emulator.
//
// The whole simulation - configuration, process table, cores, clock, memory
// manager, counters - is one value constructed at `initialize` and destroyed
// at shutdown; the command surface holds it by reference. Two threads touch
// it: the interactive thread through the command API, and the driver thread
// ticking the scheduler. Both take the scheduler lock first and the memory
// manager's lock strictly beneath it.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::Rng;
use spin::Mutex;

use crate::config::{Config, ConfigError};
use crate::instruction::{parser, ParseError};
use crate::memory::MemoryManager;
use crate::process::Pid;
use crate::scheduler::{self, SchedState};
use crate::snapshot::{ProcessSnapshot, SystemSnapshot, VmStat};
use crate::workload;
use crate::instruction::interpreter;

/// User-supplied instruction batches are capped.
pub const MAX_USER_INSTRUCTIONS: usize = 50;

/// Default dump file for the backing store.
pub const BACKING_STORE_FILE: &str = "mcos-backing-store.txt";

const ACTIVE_TICK_MS: u64 = 5;
const IDLE_TICK_MS: u64 = 50;

struct Shared {
    config: Config,
    sched: Mutex<SchedState>,
    memory: MemoryManager,
    auto_create: AtomicBool,
    driver_running: AtomicBool,
    shutting_down: AtomicBool,
    driver: Mutex<Option<JoinHandle<()>>>,
}

/// The emulator core. The command surface holds it by reference; the driver
/// thread shares the inner state through an `Arc`.
pub struct Engine {
    shared: Arc<Shared>,
}

impl Engine {
    /// Build an engine with the default backing-store dump file.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        Self::with_options(config, Some(PathBuf::from(BACKING_STORE_FILE)))
    }

    /// Build an engine; `dump_path: None` disables the on-disk dump (tests).
    pub fn with_options(config: Config, dump_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        config.validate()?;
        let memory = MemoryManager::new(config.total_frames(), config.mem_per_frame, dump_path);
        let sched = Mutex::new(SchedState::new(config.num_cpu));
        log::info!(
            "engine initialized: {} cores, {} scheduler, {} frames x {} bytes",
            config.num_cpu,
            config.scheduler,
            config.total_frames(),
            config.mem_per_frame
        );
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                sched,
                memory,
                auto_create: AtomicBool::new(false),
                driver_running: AtomicBool::new(false),
                shutting_down: AtomicBool::new(false),
                driver: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn clock(&self) -> u64 {
        self.shared.sched.lock().clock
    }

    pub fn is_driver_running(&self) -> bool {
        self.shared.driver_running.load(Ordering::Acquire)
    }

    pub fn auto_create_enabled(&self) -> bool {
        self.shared.auto_create.load(Ordering::Acquire)
    }

    /// Create a process with a randomly generated program.
    pub fn create_process(&self, name: &str, memory: usize) -> Result<Pid, CreationError> {
        self.validate_memory(memory)?;
        let count = {
            let mut rng = rand::thread_rng();
            rng.gen_range(self.shared.config.min_ins..=self.shared.config.max_ins)
        };
        let program = workload::generate_program(count, memory);
        self.admit(name, memory, program)
    }

    /// Create a process from a user-supplied `;`-separated instruction batch.
    pub fn create_process_with(
        &self,
        name: &str,
        memory: usize,
        source: &str,
    ) -> Result<Pid, CreationError> {
        self.validate_memory(memory)?;
        let program = parser::parse_program(source)?;
        if program.len() > MAX_USER_INSTRUCTIONS {
            return Err(CreationError::TooManyInstructions(program.len()));
        }
        self.admit(name, memory, program)
    }

    fn validate_memory(&self, memory: usize) -> Result<(), CreationError> {
        if memory == 0 || !memory.is_power_of_two() {
            return Err(CreationError::NotPowerOfTwo(memory));
        }
        let config = &self.shared.config;
        if memory < config.min_mem_per_proc || memory > config.max_mem_per_proc {
            return Err(CreationError::MemoryOutOfRange {
                memory,
                min: config.min_mem_per_proc,
                max: config.max_mem_per_proc,
            });
        }
        Ok(())
    }

    fn admit(
        &self,
        name: &str,
        memory: usize,
        program: Vec<crate::instruction::Instruction>,
    ) -> Result<Pid, CreationError> {
        let mut sched = self.shared.sched.lock();
        if sched.table.contains_name(name) {
            return Err(CreationError::DuplicateName(name.to_string()));
        }
        let pages = self.shared.config.pages_for(memory);
        let pid = sched.table.spawn(name.to_string(), memory, pages, program);
        log::info!("created process {name} (pid {pid}, {memory} bytes)");
        Ok(pid)
    }

    /// Immutable view of one process, by name.
    pub fn find_process(&self, name: &str) -> Option<ProcessSnapshot> {
        let sched = self.shared.sched.lock();
        let pid = sched.table.by_name(name)?.pid;
        ProcessSnapshot::capture(&sched.table, pid, &self.shared.memory)
    }

    /// Immutable view of the whole system.
    pub fn list_snapshot(&self) -> SystemSnapshot {
        let sched = self.shared.sched.lock();
        SystemSnapshot::capture(&sched, self.shared.config.num_cpu, self.shared.config.mem_per_frame)
    }

    /// Paging and CPU-tick counters.
    pub fn vmstat(&self) -> VmStat {
        let (idle, active) = {
            let sched = self.shared.sched.lock();
            (sched.idle_cpu_ticks, sched.active_cpu_ticks)
        };
        let counters = self.shared.memory.counters();
        let total_mem = self.shared.config.max_overall_mem;
        let used_mem = self.shared.memory.used_bytes();
        VmStat {
            total_mem,
            used_mem,
            free_mem: total_mem - used_mem,
            idle_cpu_ticks: idle,
            active_cpu_ticks: active,
            pages_paged_in: counters.pages_paged_in,
            pages_paged_out: counters.pages_paged_out,
        }
    }

    pub fn start_auto_create(&self) {
        self.shared.auto_create.store(true, Ordering::Release);
        log::info!(
            "auto-creation started, one process every {} tick(s)",
            self.shared.config.batch_process_freq
        );
    }

    pub fn stop_auto_create(&self) {
        self.shared.auto_create.store(false, Ordering::Release);
        log::info!("auto-creation stopped");
    }

    /// Execute one instruction of `name` outside the scheduler, for manual
    /// debugging. Terminal or exhausted processes are left untouched.
    pub fn step(&self, name: &str) -> Result<usize, EngineError> {
        let mut sched = self.shared.sched.lock();
        let index = sched
            .table
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| EngineError::ProcessNotFound(name.to_string()))?;
        let clock = sched.clock;
        let runnable = sched
            .table
            .get(index)
            .map_or(false, |p| !p.state.is_terminal() && p.pc < p.instructions.len());
        if runnable {
            interpreter::execute_current(&mut sched.table, index, &self.shared.memory, clock);
        }
        Ok(sched.table.get(index).map_or(0, |p| p.pc))
    }

    /// Run exactly one scheduler tick. The driver loop is built on this; it
    /// is public so tests and tooling can drive the simulation
    /// deterministically without wall-clock pacing.
    pub fn tick(&self) {
        let auto = self.shared.auto_create.load(Ordering::Acquire);
        let mut sched = self.shared.sched.lock();
        scheduler::tick(&mut sched, &self.shared.memory, &self.shared.config, auto);
    }

    /// Spawn (or restart) the driver thread. A driver that halted after an
    /// all-terminal snapshot is restarted by the next call.
    pub fn ensure_driver(&self) {
        if self.shared.driver_running.swap(true, Ordering::AcqRel) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        match thread::Builder::new().name("mcos-driver".to_string()).spawn(move || {
            driver_loop(shared);
        }) {
            Ok(handle) => {
                // A previous handle, if any, belongs to a thread that already
                // cleared driver_running; dropping it just detaches it.
                *self.shared.driver.lock() = Some(handle);
                log::info!("scheduler driver started");
            }
            Err(err) => {
                self.shared.driver_running.store(false, Ordering::Release);
                log::error!("could not spawn scheduler driver: {err}");
            }
        }
    }

    /// Cooperative shutdown: flag the driver and join it.
    pub fn shutdown(&self) {
        self.shared.shutting_down.store(true, Ordering::Release);
        let handle = self.shared.driver.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        self.shared.shutting_down.store(false, Ordering::Release);
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn driver_loop(shared: Arc<Shared>) {
    loop {
        if shared.shutting_down.load(Ordering::Acquire) {
            break;
        }
        let auto = shared.auto_create.load(Ordering::Acquire);
        let has_work = auto || shared.sched.lock().table.any_active();

        if has_work {
            // Pacing happens outside the lock; the tick itself is one
            // critical section.
            thread::sleep(Duration::from_millis(ACTIVE_TICK_MS + shared.config.delays_per_exec));
            let mut sched = shared.sched.lock();
            scheduler::tick(&mut sched, &shared.memory, &shared.config, auto);
        } else {
            thread::sleep(Duration::from_millis(IDLE_TICK_MS));
        }

        let halted = {
            let sched = shared.sched.lock();
            !sched.table.is_empty()
                && sched.table.all_terminal()
                && !shared.auto_create.load(Ordering::Acquire)
        };
        if halted {
            let clock = shared.sched.lock().clock;
            log::info!("[tick {clock}] scheduler driver halted (all processes terminal)");
            break;
        }
    }
    shared.driver_running.store(false, Ordering::Release);
}

/// Command-surface errors that are not creation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    ProcessNotFound(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::ProcessNotFound(name) => write!(f, "process {name} not found"),
        }
    }
}

impl std::error::Error for EngineError {}

/// Rejections reported before a process enters the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreationError {
    DuplicateName(String),
    NotPowerOfTwo(usize),
    MemoryOutOfRange { memory: usize, min: usize, max: usize },
    TooManyInstructions(usize),
    Parse(ParseError),
}

impl fmt::Display for CreationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreationError::DuplicateName(name) => write!(f, "process {name} already exists"),
            CreationError::NotPowerOfTwo(memory) => {
                write!(f, "memory must be a power of 2, got {memory}")
            }
            CreationError::MemoryOutOfRange { memory, min, max } => {
                write!(f, "memory {memory} outside allowed range [{min}, {max}]")
            }
            CreationError::TooManyInstructions(count) => {
                write!(f, "instruction batch of {count} exceeds the {MAX_USER_INSTRUCTIONS} cap")
            }
            CreationError::Parse(err) => write!(f, "invalid instruction: {err}"),
        }
    }
}

impl std::error::Error for CreationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CreationError::Parse(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ParseError> for CreationError {
    fn from(err: ParseError) -> Self {
        CreationError::Parse(err)
    }
}
