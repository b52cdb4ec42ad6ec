// End-to-end scenario tests for the MCOS emulator.
//
// Every scenario drives `Engine::tick()` directly, so nothing here depends
// on wall-clock pacing, and the backing-store dump file is disabled.

use crate::engine::{CreationError, Engine};
use crate::process::ProcessState;
use crate::scheduler::SchedulerPolicy;
use crate::Config;

fn test_config(policy: SchedulerPolicy, num_cpu: usize) -> Config {
    Config {
        num_cpu,
        scheduler: policy,
        quantum_cycles: 2,
        min_mem_per_proc: 16,
        max_mem_per_proc: 4096,
        ..Config::default()
    }
}

fn engine_with(config: Config) -> Engine {
    Engine::with_options(config, None).unwrap()
}

fn tick_n(engine: &Engine, ticks: usize) {
    for _ in 0..ticks {
        engine.tick();
    }
}

fn state_of(engine: &Engine, name: &str) -> ProcessState {
    engine.find_process(name).unwrap().state
}

fn variable(engine: &Engine, name: &str, var: &str) -> Option<u16> {
    engine
        .find_process(name)?
        .variables
        .into_iter()
        .find(|v| v.name == var)?
        .value
}

fn logs_of(engine: &Engine, name: &str) -> Vec<String> {
    engine.find_process(name).unwrap().logs
}

#[test]
fn test_rr_preemption_interleaves_processes() {
    let engine = engine_with(test_config(SchedulerPolicy::RoundRobin, 1));
    engine
        .create_process_with("p1", 64, "DECLARE(x, 1); ADD(x, x, 1); ADD(x, x, 1); ADD(x, x, 1)")
        .unwrap();
    engine.create_process_with("p2", 64, "DECLARE(y, 5)").unwrap();

    // Quantum of 2: p1 runs two instructions, then is preempted while p2
    // still waits.
    tick_n(&engine, 2);
    assert_eq!(state_of(&engine, "p1"), ProcessState::Ready);
    assert_eq!(engine.find_process("p1").unwrap().pc, 2);
    assert_eq!(variable(&engine, "p1", "x"), Some(2));

    // p2 gets the core, runs its single instruction, and finishes.
    engine.tick();
    assert_eq!(state_of(&engine, "p2"), ProcessState::Finished);
    assert_eq!(variable(&engine, "p2", "y"), Some(5));

    // p1 resumes and accumulates to completion.
    engine.tick();
    assert_eq!(variable(&engine, "p1", "x"), Some(3));
    engine.tick();
    assert_eq!(state_of(&engine, "p1"), ProcessState::Finished);
    assert_eq!(variable(&engine, "p1", "x"), Some(4));
}

#[test]
fn test_lru_eviction_with_single_frame() {
    let config = Config {
        max_overall_mem: 16,
        mem_per_frame: 16,
        max_mem_per_proc: 64,
        ..test_config(SchedulerPolicy::Fcfs, 1)
    };
    assert_eq!(config.total_frames(), 1);
    let engine = engine_with(config);
    engine
        .create_process_with("p", 64, "WRITE(0, 7); WRITE(16, 9); READ(z, 0); PRINT(z)")
        .unwrap();

    tick_n(&engine, 4);
    assert_eq!(state_of(&engine, "p"), ProcessState::Finished);
    // The value written before two evictions survived the round trip
    // through the backing store.
    assert_eq!(logs_of(&engine, "p"), vec!["7".to_string()]);

    let stat = engine.vmstat();
    // Page 0 in, page 1 in (page 0 out dirty), page 0 back in (page 1 out).
    assert_eq!(stat.pages_paged_in, 3);
    assert_eq!(stat.pages_paged_out, 2);
    assert!(stat.pages_paged_in >= stat.pages_paged_out);
}

#[test]
fn test_sleep_lets_other_process_run_first() {
    let engine = engine_with(test_config(SchedulerPolicy::RoundRobin, 1));
    engine.create_process_with("p1", 64, "SLEEP(3); PRINT('a')").unwrap();
    engine.create_process_with("p2", 64, "PRINT('b')").unwrap();

    tick_n(&engine, 2);
    assert_eq!(logs_of(&engine, "p2"), vec!["b".to_string()]);
    assert_eq!(state_of(&engine, "p1"), ProcessState::Sleeping);
    assert!(logs_of(&engine, "p1").is_empty());

    // Still asleep one tick later: 'b' strictly precedes 'a'.
    engine.tick();
    assert!(logs_of(&engine, "p1").is_empty());

    tick_n(&engine, 2);
    assert_eq!(logs_of(&engine, "p1"), vec!["a".to_string()]);
    assert_eq!(state_of(&engine, "p1"), ProcessState::Finished);
}

#[test]
fn test_out_of_range_write_violates_memory() {
    let engine = engine_with(test_config(SchedulerPolicy::Fcfs, 1));
    engine.create_process_with("p", 32, "WRITE(64, 1)").unwrap();

    engine.tick();
    let snapshot = engine.find_process("p").unwrap();
    assert_eq!(snapshot.state, ProcessState::MemoryViolated);
    assert_eq!(snapshot.pc, 0, "pc must not advance past the violation");
    assert_eq!(engine.list_snapshot().running, 0, "core must be released");

    // Terminal: further ticks change nothing.
    tick_n(&engine, 3);
    assert_eq!(state_of(&engine, "p"), ProcessState::MemoryViolated);
    assert_eq!(engine.find_process("p").unwrap().pc, 0);
}

#[test]
fn test_for_expansion_runs_body_repeatedly() {
    let engine = engine_with(test_config(SchedulerPolicy::RoundRobin, 1));
    engine.create_process_with("p", 64, "FOR([ADD(x, x, 1)], 3)").unwrap();

    // Tick 1 expands in place without advancing pc.
    engine.tick();
    let snapshot = engine.find_process("p").unwrap();
    assert_eq!(snapshot.pc, 0);
    assert_eq!(snapshot.instruction_count, 3);

    // Three execution ticks run the expanded body.
    tick_n(&engine, 3);
    let snapshot = engine.find_process("p").unwrap();
    assert_eq!(snapshot.pc, 3);
    assert_eq!(snapshot.state, ProcessState::Finished);
    assert_eq!(variable(&engine, "p", "x"), Some(3));
}

#[test]
fn test_fcfs_does_not_preempt() {
    let engine = engine_with(test_config(SchedulerPolicy::Fcfs, 1));
    engine.create_process_with("long", 64, "FOR([ADD(x, x, 1)], 60)").unwrap();
    engine.create_process_with("short", 64, "PRINT('late')").unwrap();

    // Far beyond any RR quantum, the long process still owns the core.
    tick_n(&engine, 30);
    assert_eq!(state_of(&engine, "long"), ProcessState::Running);
    let short = engine.find_process("short").unwrap();
    assert_eq!(short.state, ProcessState::Ready);
    assert_eq!(short.pc, 0);
    assert!(short.logs.is_empty());

    // 1 expansion tick + 60 body ticks finishes the long process; only then
    // does the short one run.
    tick_n(&engine, 31);
    assert_eq!(state_of(&engine, "long"), ProcessState::Finished);
    assert_eq!(variable(&engine, "long", "x"), Some(60));
    tick_n(&engine, 2);
    assert_eq!(state_of(&engine, "short"), ProcessState::Finished);
    assert_eq!(logs_of(&engine, "short"), vec!["late".to_string()]);
}

#[test]
fn test_multicore_utilization_and_counters() {
    let engine = engine_with(test_config(SchedulerPolicy::RoundRobin, 2));
    engine.create_process_with("a", 64, "DECLARE(v, 1); ADD(v, v, 1); ADD(v, v, 1)").unwrap();
    engine.create_process_with("b", 64, "DECLARE(w, 2); ADD(w, w, 2); ADD(w, w, 2)").unwrap();

    engine.tick();
    let snapshot = engine.list_snapshot();
    assert_eq!(snapshot.running, 2);
    assert!((snapshot.cpu_utilization - 1.0).abs() < f32::EPSILON);

    tick_n(&engine, 3);
    assert_eq!(state_of(&engine, "a"), ProcessState::Finished);
    assert_eq!(state_of(&engine, "b"), ProcessState::Finished);
    assert_eq!(variable(&engine, "a", "v"), Some(3));
    assert_eq!(variable(&engine, "b", "w"), Some(6));

    let stat = engine.vmstat();
    assert!(stat.active_cpu_ticks >= 6);
    assert_eq!(stat.total_mem, stat.used_mem + stat.free_mem);
}

#[test]
fn test_paging_pressure_keeps_counters_consistent() {
    // 4 frames under two processes of 4 pages each force steady eviction.
    let config = Config {
        max_overall_mem: 64,
        mem_per_frame: 16,
        max_mem_per_proc: 64,
        ..test_config(SchedulerPolicy::RoundRobin, 2)
    };
    let engine = engine_with(config);
    engine
        .create_process_with(
            "a",
            64,
            "WRITE(0, 1); WRITE(16, 2); WRITE(32, 3); WRITE(48, 4); READ(r, 0); PRINT(r)",
        )
        .unwrap();
    engine
        .create_process_with(
            "b",
            64,
            "WRITE(0, 5); WRITE(16, 6); WRITE(32, 7); WRITE(48, 8); READ(s, 48); PRINT(s)",
        )
        .unwrap();

    tick_n(&engine, 20);
    assert_eq!(state_of(&engine, "a"), ProcessState::Finished);
    assert_eq!(state_of(&engine, "b"), ProcessState::Finished);
    // Writes survive eviction regardless of interleaving.
    assert_eq!(logs_of(&engine, "a"), vec!["1".to_string()]);
    assert_eq!(logs_of(&engine, "b"), vec!["8".to_string()]);

    let stat = engine.vmstat();
    assert!(stat.pages_paged_in >= stat.pages_paged_out);
    assert!(stat.used_mem <= stat.total_mem);
}

#[test]
fn test_creation_rejections() {
    let engine = engine_with(test_config(SchedulerPolicy::RoundRobin, 1));
    engine.create_process_with("taken", 64, "PRINT('x')").unwrap();

    assert!(matches!(
        engine.create_process_with("taken", 64, "PRINT('x')"),
        Err(CreationError::DuplicateName(_))
    ));
    assert!(matches!(
        engine.create_process_with("odd", 48, "PRINT('x')"),
        Err(CreationError::NotPowerOfTwo(48))
    ));
    assert!(matches!(
        engine.create_process_with("tiny", 8, "PRINT('x')"),
        Err(CreationError::MemoryOutOfRange { memory: 8, .. })
    ));
    assert!(matches!(
        engine.create_process_with("bad", 64, "JUMP(3)"),
        Err(CreationError::Parse(_))
    ));
    let big: Vec<String> = (0..51).map(|i| format!("DECLARE(v{i}, 1)")).collect();
    assert!(matches!(
        engine.create_process_with("big", 64, &big.join("; ")),
        Err(CreationError::TooManyInstructions(51))
    ));

    // Rejected creations never entered the table.
    assert_eq!(engine.list_snapshot().processes.len(), 1);
}

#[test]
fn test_zero_instruction_process_finishes_on_first_dispatch() {
    let engine = engine_with(test_config(SchedulerPolicy::Fcfs, 1));
    engine.create_process_with("empty", 64, "").unwrap();
    engine.tick();
    let snapshot = engine.find_process("empty").unwrap();
    assert_eq!(snapshot.state, ProcessState::Finished);
    assert_eq!(snapshot.pc, 0);
}

#[test]
fn test_step_executes_outside_the_scheduler() {
    let engine = engine_with(test_config(SchedulerPolicy::RoundRobin, 1));
    engine.create_process_with("p", 64, "DECLARE(x, 9); ADD(x, x, 1)").unwrap();

    assert_eq!(engine.step("p").unwrap(), 1);
    assert_eq!(engine.clock(), 0, "step must not advance the clock");
    assert_eq!(variable(&engine, "p", "x"), Some(9));
    assert_eq!(engine.step("p").unwrap(), 2);
    assert_eq!(variable(&engine, "p", "x"), Some(10));
    // Exhausted: further steps are no-ops.
    assert_eq!(engine.step("p").unwrap(), 2);
    assert!(engine.step("ghost").is_err());
}

#[test]
fn test_auto_create_adds_processes_while_enabled() {
    let engine = engine_with(test_config(SchedulerPolicy::RoundRobin, 2));
    engine.start_auto_create();
    tick_n(&engine, engine.config().batch_process_freq as usize * 3);
    engine.stop_auto_create();

    let created = engine.list_snapshot().processes.len();
    assert_eq!(created, 3);

    let before = engine.list_snapshot().processes.len();
    tick_n(&engine, 10);
    assert_eq!(engine.list_snapshot().processes.len(), before);
}

#[test]
fn test_driver_thread_runs_to_halt() {
    let engine = engine_with(test_config(SchedulerPolicy::RoundRobin, 1));
    engine.create_process_with("p", 64, "DECLARE(x, 1); ADD(x, x, 2)").unwrap();
    engine.ensure_driver();

    // The driver paces itself on wall clock; give it ample time to finish
    // the two instructions and observe the all-terminal snapshot.
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
    while engine.is_driver_running() && std::time::Instant::now() < deadline {
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    assert!(!engine.is_driver_running(), "driver should halt on its own");
    assert_eq!(state_of(&engine, "p"), ProcessState::Finished);
    assert_eq!(variable(&engine, "p", "x"), Some(3));
    engine.shutdown();
}

#[test]
fn test_snapshot_reports_swapped_out_variables() {
    // One frame: declaring a variable then touching another page swaps the
    // symbol page out, so the snapshot shows no value for it.
    let config = Config {
        max_overall_mem: 16,
        mem_per_frame: 16,
        max_mem_per_proc: 64,
        ..test_config(SchedulerPolicy::Fcfs, 1)
    };
    let engine = engine_with(config);
    engine.create_process_with("p", 64, "DECLARE(x, 3); WRITE(16, 1); SLEEP(5)").unwrap();

    tick_n(&engine, 2);
    let snapshot = engine.find_process("p").unwrap();
    let x = snapshot.variables.iter().find(|v| v.name == "x").unwrap();
    assert_eq!(x.value, None, "page 0 is swapped out");
    assert_eq!(snapshot.resident_pages, 1);
}
