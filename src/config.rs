// Configuration handling for the MCOS emulator.
//
// The config file is plain key-value text, one whitespace-separated pair per
// line. A missing or unreadable file is regenerated with safe defaults and
// reloaded, so `initialize` always succeeds on a fresh checkout.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::scheduler::SchedulerPolicy;

/// System configuration loaded at `initialize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub num_cpu: usize,
    pub scheduler: SchedulerPolicy,
    /// RR quantum in ticks. Ignored under FCFS.
    pub quantum_cycles: u32,
    /// Create one auto process every N ticks while auto-creation is enabled.
    pub batch_process_freq: u64,
    pub min_ins: usize,
    pub max_ins: usize,
    /// Extra per-instruction wall delay in milliseconds.
    pub delays_per_exec: u64,
    /// Total physical memory in bytes.
    pub max_overall_mem: usize,
    /// Frame (and page) size in bytes.
    pub mem_per_frame: usize,
    pub min_mem_per_proc: usize,
    pub max_mem_per_proc: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_cpu: 4,
            scheduler: SchedulerPolicy::RoundRobin,
            quantum_cycles: 2,
            batch_process_freq: 3,
            min_ins: 5,
            max_ins: 10,
            delays_per_exec: 1,
            max_overall_mem: 16384,
            mem_per_frame: 16,
            min_mem_per_proc: 4096,
            max_mem_per_proc: 4096,
        }
    }
}

impl Config {
    /// Number of physical frames backing the simulation.
    pub fn total_frames(&self) -> usize {
        self.max_overall_mem / self.mem_per_frame
    }

    /// Number of pages a process of `memory` bytes needs.
    pub fn pages_for(&self, memory: usize) -> usize {
        memory.div_ceil(self.mem_per_frame)
    }

    /// Load the configuration from `path`, regenerating defaults when the
    /// file is missing or fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(_) => {
                log::warn!("{} not found, generating defaults", path.display());
                Self::write_default(path)?;
                fs::read_to_string(path).map_err(ConfigError::Io)?
            }
        };

        let config = Self::parse(&text)?;
        if let Err(err) = config.validate() {
            log::warn!("invalid configuration ({err}), regenerating defaults");
            Self::write_default(path)?;
            let text = fs::read_to_string(path).map_err(ConfigError::Io)?;
            let config = Self::parse(&text)?;
            config.validate()?;
            return Ok(config);
        }
        Ok(config)
    }

    /// Parse key-value configuration text over the defaults.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        for line in text.lines() {
            let mut fields = line.split_whitespace();
            let (key, value) = match (fields.next(), fields.next()) {
                (Some(key), Some(value)) => (key, value),
                (None, _) => continue,
                (Some(key), None) => {
                    return Err(ConfigError::MissingValue(key.to_string()));
                }
            };

            match key {
                "num-cpu" => config.num_cpu = parse_num(key, value)?,
                "scheduler" => {
                    config.scheduler = match SchedulerPolicy::from_name(value) {
                        Some(policy) => policy,
                        None => {
                            log::warn!(
                                "unsupported scheduler '{value}', defaulting to round-robin"
                            );
                            SchedulerPolicy::RoundRobin
                        }
                    }
                }
                "quantum-cycles" => config.quantum_cycles = parse_num(key, value)?,
                "batch-process-freq" => config.batch_process_freq = parse_num(key, value)?,
                "min-ins" => config.min_ins = parse_num(key, value)?,
                "max-ins" => config.max_ins = parse_num(key, value)?,
                "delays-per-exec" => config.delays_per_exec = parse_num(key, value)?,
                "max-overall-mem" => config.max_overall_mem = parse_num(key, value)?,
                "mem-per-frame" => config.mem_per_frame = parse_num(key, value)?,
                "min-mem-per-proc" => config.min_mem_per_proc = parse_num(key, value)?,
                "max-mem-per-proc" => config.max_mem_per_proc = parse_num(key, value)?,
                other => log::warn!("ignoring unrecognized config key '{other}'"),
            }
        }

        Ok(config)
    }

    /// Reject configurations the scheduler or memory manager cannot run on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_cpu == 0 {
            return Err(ConfigError::Invalid("num-cpu must be positive"));
        }
        if self.quantum_cycles == 0 {
            return Err(ConfigError::Invalid("quantum-cycles must be at least 1"));
        }
        if self.batch_process_freq == 0 {
            return Err(ConfigError::Invalid("batch-process-freq must be at least 1"));
        }
        if self.min_ins == 0 || self.min_ins > self.max_ins {
            return Err(ConfigError::Invalid("instruction bounds must satisfy 1 <= min-ins <= max-ins"));
        }
        if self.mem_per_frame == 0 || self.max_overall_mem < self.mem_per_frame {
            return Err(ConfigError::Invalid("memory must hold at least one frame"));
        }
        if self.min_mem_per_proc == 0 || self.min_mem_per_proc > self.max_mem_per_proc {
            return Err(ConfigError::Invalid("per-process memory bounds must satisfy 1 <= min <= max"));
        }
        Ok(())
    }

    /// Write the default configuration file.
    pub fn write_default(path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let mut file = fs::File::create(path).map_err(ConfigError::Io)?;
        let defaults = Config::default();
        write!(
            file,
            "num-cpu {}\nscheduler {}\nquantum-cycles {}\nbatch-process-freq {}\n\
             min-ins {}\nmax-ins {}\ndelays-per-exec {}\nmax-overall-mem {}\n\
             mem-per-frame {}\nmin-mem-per-proc {}\nmax-mem-per-proc {}\n",
            defaults.num_cpu,
            defaults.scheduler,
            defaults.quantum_cycles,
            defaults.batch_process_freq,
            defaults.min_ins,
            defaults.max_ins,
            defaults.delays_per_exec,
            defaults.max_overall_mem,
            defaults.mem_per_frame,
            defaults.min_mem_per_proc,
            defaults.max_mem_per_proc,
        )
        .map_err(ConfigError::Io)
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    MissingValue(String),
    InvalidValue { key: String, value: String },
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "config I/O error: {err}"),
            ConfigError::MissingValue(key) => write!(f, "config key '{key}' has no value"),
            ConfigError::InvalidValue { key, value } => {
                write!(f, "config key '{key}' has invalid value '{value}'")
            }
            ConfigError::Invalid(reason) => write!(f, "invalid configuration: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(err) => Some(err),
            _ => None,
        }
    }
}
