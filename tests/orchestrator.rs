//! End-to-end runs of the orchestrator against real worker processes

use ipcsum::coordinator::launcher::{CommandLauncher, ProcessLauncher, WorkerHandle};
use ipcsum::coordinator::wait::WaitPolicy;
use ipcsum::coordinator::{MissingResultPolicy, Orchestrator, RunOptions};
use ipcsum::transport::WorkerInvocation;
use ipcsum::{NumberSequence, RunError, TransportKind};
use rand::Rng;
use std::io;
use std::time::{Duration, Instant};

const BOTH: [TransportKind; 2] = [TransportKind::SharedMemory, TransportKind::Pipe];

fn worker_launcher() -> CommandLauncher {
    CommandLauncher::worker_binary(env!("CARGO_BIN_EXE_ipcsum"))
}

fn orchestrator() -> Orchestrator<CommandLauncher> {
    Orchestrator::new(worker_launcher(), RunOptions::default())
}

fn numbers(values: &[f32]) -> NumberSequence {
    NumberSequence::from(values.to_vec())
}

fn sh(script: &str) -> CommandLauncher {
    CommandLauncher::new("sh", ["-c", script])
}

/// Real workers for the indices in `healthy`, `fallback` for the rest
struct MixedLauncher {
    healthy: Vec<usize>,
    real: CommandLauncher,
    fallback: CommandLauncher,
}

impl ProcessLauncher for MixedLauncher {
    fn spawn(&self, invocation: WorkerInvocation) -> io::Result<WorkerHandle> {
        if self.healthy.contains(&invocation.index) {
            self.real.spawn(invocation)
        } else {
            self.fallback.spawn(invocation)
        }
    }
}

/// Spawns a long-running process for worker 0 and refuses every later spawn
struct FailAfterFirst;

impl ProcessLauncher for FailAfterFirst {
    fn spawn(&self, invocation: WorkerInvocation) -> io::Result<WorkerHandle> {
        if invocation.index == 0 {
            sh("exec sleep 30").spawn(invocation)
        } else {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "process limit reached"))
        }
    }
}

#[test]
fn test_five_numbers_two_workers() {
    for kind in BOTH {
        let report = orchestrator()
            .run(&numbers(&[1.0, 2.0, 3.0, 4.0, 5.0]), 2, kind)
            .unwrap();

        assert_eq!(report.total, 55.0, "{}", kind);
        assert_eq!(report.effective_workers(), 2);
        assert!(report.clamp_warning().is_none());
        assert_eq!(report.workers[0].partial, 14.0);
        assert_eq!(report.workers[1].partial, 41.0);
        assert!(report.workers.iter().all(|w| w.contributed && w.exit_code == Some(0)));
    }
}

#[test]
fn test_two_numbers_one_worker() {
    for kind in BOTH {
        let report = orchestrator().run(&numbers(&[2.0, 2.0]), 1, kind).unwrap();
        assert_eq!(report.total, 8.0, "{}", kind);
    }
}

#[test]
fn test_worker_count_clamped() {
    for kind in BOTH {
        let report = orchestrator().run(&numbers(&[1.0, -2.0, 3.0]), 5, kind).unwrap();

        assert_eq!(report.total, 14.0, "{}", kind);
        assert_eq!(report.effective_workers(), 1);
        let warning = report.clamp_warning().unwrap();
        assert_eq!((warning.requested, warning.effective), (5, 1));
    }
}

#[test]
fn test_transports_agree_on_random_input() {
    let mut rng = rand::thread_rng();
    let values: Vec<f32> = (0..50_000).map(|_| rng.gen_range(-100.0f32..100.0)).collect();
    let exact: f64 = values.iter().map(|&v| f64::from(v) * f64::from(v)).sum();
    let sequence = NumberSequence::from(values);

    let shm = orchestrator().run(&sequence, 7, TransportKind::SharedMemory).unwrap();
    let pipe = orchestrator().run(&sequence, 7, TransportKind::Pipe).unwrap();

    let rel = |a: f64, b: f64| ((a - b) / b).abs();
    assert!(rel(shm.total, pipe.total) < 1e-4, "shm={} pipe={}", shm.total, pipe.total);
    assert!(rel(shm.total, exact) < 1e-4, "shm={} exact={}", shm.total, exact);
}

#[test]
fn test_total_independent_of_worker_count() {
    let values: Vec<f32> = (1..=240).map(|v| v as f32 / 10.0).collect();
    let sequence = NumberSequence::from(values);
    let reference = orchestrator().run(&sequence, 1, TransportKind::SharedMemory).unwrap().total;

    for workers in [2, 3, 5, 16, 60] {
        for kind in BOTH {
            let total = orchestrator().run(&sequence, workers, kind).unwrap().total;
            assert!(
                ((total - reference) / reference).abs() < 1e-4,
                "workers={} {} total={} reference={}",
                workers,
                kind,
                total,
                reference
            );
        }
    }
}

#[test]
fn test_single_number_rejected() {
    for kind in BOTH {
        let err = orchestrator().run(&numbers(&[3.0]), 1, kind).unwrap_err();
        assert!(matches!(err, RunError::InvalidInput(_)));
        assert!(err.is_setup_failure());
    }
}

#[test]
fn test_silent_worker_is_a_missing_result() {
    // Exits without touching the result segment
    let orchestrator = Orchestrator::new(sh("exit 0"), RunOptions::default());
    let err = orchestrator
        .run(&numbers(&[1.0, 2.0, 3.0, 4.0]), 2, TransportKind::SharedMemory)
        .unwrap_err();
    assert!(matches!(err, RunError::MissingResult { worker: 0, .. }), "{:?}", err);

    // Drains stdin, writes nothing
    let orchestrator = Orchestrator::new(sh("cat >/dev/null"), RunOptions::default());
    let err = orchestrator
        .run(&numbers(&[1.0, 2.0, 3.0, 4.0]), 2, TransportKind::Pipe)
        .unwrap_err();
    assert!(matches!(err, RunError::MissingResult { worker: 0, .. }), "{:?}", err);
}

#[test]
fn test_truncated_pipe_result_is_a_transport_error() {
    // Two bytes are not a value
    let orchestrator = Orchestrator::new(sh("cat >/dev/null; printf ab"), RunOptions::default());
    let err = orchestrator
        .run(&numbers(&[1.0, 2.0]), 1, TransportKind::Pipe)
        .unwrap_err();
    assert!(matches!(err, RunError::Transport { .. }), "{:?}", err);
}

#[test]
fn test_zero_policy_counts_missing_worker_as_zero() {
    for kind in BOTH {
        let launcher = MixedLauncher {
            healthy: vec![0],
            real: worker_launcher(),
            fallback: sh("cat >/dev/null; exit 3"),
        };
        let options = RunOptions {
            missing_result: MissingResultPolicy::Zero,
            ..RunOptions::default()
        };
        let report = Orchestrator::new(launcher, options)
            .run(&numbers(&[1.0, 2.0, 3.0, 4.0]), 2, kind)
            .unwrap();

        // Only worker 0 ([1, 2]) contributes
        assert_eq!(report.total, 5.0, "{}", kind);
        assert_eq!(report.missing_workers(), vec![1]);
        assert_eq!(report.workers[1].exit_code, Some(3));
        assert_eq!(report.workers[1].partial, 0.0);
    }
}

#[test]
fn test_missing_program_fails_first_spawn() {
    let launcher = CommandLauncher::new("/nonexistent/ipcsum", ["worker"]);
    for kind in BOTH {
        let err = Orchestrator::new(launcher.clone(), RunOptions::default())
            .run(&numbers(&[1.0, 2.0, 3.0, 4.0]), 2, kind)
            .unwrap_err();
        assert!(matches!(err, RunError::Spawn { worker: 0, .. }), "{:?}", err);
    }
}

#[test]
fn test_spawn_failure_terminates_earlier_workers() {
    for kind in BOTH {
        let start = Instant::now();
        let err = Orchestrator::new(FailAfterFirst, RunOptions::default())
            .run(&numbers(&[1.0, 2.0, 3.0, 4.0]), 2, kind)
            .unwrap_err();

        assert!(matches!(err, RunError::Spawn { worker: 1, .. }), "{:?}", err);
        // Worker 0 sleeps for 30s unless it was killed
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}

#[test]
fn test_deadline_terminates_stalled_workers() {
    let options = RunOptions {
        wait: WaitPolicy::Deadline(Duration::from_millis(300)),
        ..RunOptions::default()
    };
    let start = Instant::now();
    let err = Orchestrator::new(sh("exec sleep 30"), options)
        .run(&numbers(&[1.0, 2.0, 3.0, 4.0]), 2, TransportKind::SharedMemory)
        .unwrap_err();

    assert!(matches!(err, RunError::WorkerTimeout { .. }), "{:?}", err);
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[test]
fn test_deadline_met_by_real_workers() {
    let options = RunOptions {
        wait: WaitPolicy::Deadline(Duration::from_secs(30)),
        ..RunOptions::default()
    };
    for kind in BOTH {
        let report = Orchestrator::new(worker_launcher(), options)
            .run(&numbers(&[1.0, 2.0, 3.0, 4.0, 5.0]), 2, kind)
            .unwrap();
        assert_eq!(report.total, 55.0);
    }
}

#[test]
fn test_concurrent_runs_do_not_share_resources() {
    let handles: Vec<_> = (0..4)
        .map(|i| {
            std::thread::spawn(move || {
                let base = i as f32;
                let values = vec![base, base, base, base];
                orchestrator()
                    .run(&NumberSequence::from(values), 2, TransportKind::SharedMemory)
                    .unwrap()
                    .total
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let expected = 4.0 * (i as f64) * (i as f64);
        assert_eq!(handle.join().unwrap(), expected);
    }
}

#[cfg(target_os = "linux")]
#[test]
fn test_shared_memory_objects_removed_after_run() {
    let report = orchestrator()
        .run(&numbers(&[1.0, 2.0, 3.0, 4.0]), 2, TransportKind::SharedMemory)
        .unwrap();

    let leftovers: Vec<String> = std::fs::read_dir("/dev/shm")
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.contains(&report.run_id))
        .collect();
    assert!(leftovers.is_empty(), "leaked: {:?}", leftovers);
}
