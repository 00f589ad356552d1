//! Completion wait policy
//!
//! The orchestrator blocks here until every worker has terminated. The default
//! waits without bound; a deadline is opt-in.

use super::launcher::WorkerHandle;
use crate::error::{RunError, RunResult};
use std::process::ExitStatus;
use std::thread;
use std::time::{Duration, Instant};

/// Interval between status polls under a deadline
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long the orchestrator waits for workers to terminate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitPolicy {
    /// Block until every worker exits; a stalled worker stalls the run
    #[default]
    Unbounded,
    /// Fail with `WorkerTimeout` if any worker is still running after this long
    Deadline(Duration),
}

impl WaitPolicy {
    /// `None` means unbounded
    pub fn from_timeout(timeout_secs: Option<u64>) -> Self {
        match timeout_secs {
            Some(secs) => WaitPolicy::Deadline(Duration::from_secs(secs)),
            None => WaitPolicy::Unbounded,
        }
    }

    /// Wait for all workers; statuses are returned in worker order
    ///
    /// On timeout every worker still running is killed and reaped before the
    /// error is returned.
    pub fn wait_all(&self, workers: &mut [WorkerHandle]) -> RunResult<Vec<ExitStatus>> {
        match *self {
            WaitPolicy::Unbounded => workers
                .iter_mut()
                .map(|w| {
                    w.wait().map_err(|source| RunError::Wait {
                        worker: w.index(),
                        source,
                    })
                })
                .collect(),
            WaitPolicy::Deadline(timeout) => wait_with_deadline(workers, timeout),
        }
    }
}

fn wait_with_deadline(workers: &mut [WorkerHandle], timeout: Duration) -> RunResult<Vec<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    let mut statuses: Vec<Option<ExitStatus>> = vec![None; workers.len()];

    loop {
        for (slot, worker) in statuses.iter_mut().zip(workers.iter_mut()) {
            if slot.is_none() {
                *slot = worker.try_wait().map_err(|source| RunError::Wait {
                    worker: worker.index(),
                    source,
                })?;
            }
        }

        if statuses.iter().all(Option::is_some) {
            return Ok(statuses.into_iter().flatten().collect());
        }

        if Instant::now() >= deadline {
            let stalled = statuses
                .iter()
                .position(Option::is_none)
                .and_then(|i| workers.get(i))
                .map_or(0, WorkerHandle::index);
            tracing::warn!(worker = stalled, ?timeout, "completion deadline passed, terminating workers");
            for worker in workers.iter_mut() {
                worker.terminate();
            }
            return Err(RunError::WorkerTimeout {
                worker: stalled,
                timeout,
            });
        }

        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::launcher::{CommandLauncher, ProcessLauncher};
    use crate::transport::{StdioBinding, WorkerInvocation};

    fn spawn(script: &str, index: usize) -> WorkerHandle {
        CommandLauncher::new("sh", ["-c", script])
            .spawn(WorkerInvocation {
                index,
                args: Vec::new(),
                stdio: StdioBinding::Inherit,
            })
            .unwrap()
    }

    #[test]
    fn test_from_timeout() {
        assert_eq!(WaitPolicy::from_timeout(None), WaitPolicy::Unbounded);
        assert_eq!(
            WaitPolicy::from_timeout(Some(3)),
            WaitPolicy::Deadline(Duration::from_secs(3))
        );
        assert_eq!(WaitPolicy::default(), WaitPolicy::Unbounded);
    }

    #[test]
    fn test_unbounded_returns_statuses_in_order() {
        let mut workers = vec![spawn("exit 1", 0), spawn("exit 0", 1)];
        let statuses = WaitPolicy::Unbounded.wait_all(&mut workers).unwrap();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].code(), Some(1));
        assert!(statuses[1].success());
    }

    #[test]
    fn test_deadline_met() {
        let mut workers = vec![spawn("sleep 0.1", 0), spawn("exit 0", 1)];
        let statuses = WaitPolicy::Deadline(Duration::from_secs(20))
            .wait_all(&mut workers)
            .unwrap();
        assert!(statuses.iter().all(ExitStatus::success));
    }

    #[test]
    fn test_deadline_expires() {
        let mut workers = vec![spawn("exit 0", 0), spawn("exec sleep 30", 1)];
        let start = Instant::now();
        let err = WaitPolicy::Deadline(Duration::from_millis(200))
            .wait_all(&mut workers)
            .unwrap_err();

        assert!(matches!(err, RunError::WorkerTimeout { worker: 1, .. }));
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(workers.iter().all(|w| w.status().is_some()), "all workers reaped");
    }
}
