//! Coordinator module
//!
//! The [`Orchestrator`] drives one sum-of-squares run from input to total:
//!
//! ```text
//! Init -> ResourcesCreated -> WorkersSpawned -> AwaitingCompletion
//!      -> Aggregating -> ResourcesReleased -> Done
//! ```
//!
//! Any state may fail. Once transport resources exist, every failure path
//! kills and reaps spawned workers and releases the resources before the error
//! is returned.

pub mod launcher;
pub mod wait;

use crate::error::{RunError, RunResult};
use crate::input::NumberSequence;
use crate::partition::{ClampWarning, Partition, PartitionPlan};
use crate::stats::ResultAggregator;
use crate::transport::{PipeTransport, RunId, SharedMemoryTransport, Transport, TransportKind};
use launcher::{ProcessLauncher, WorkerHandle};
use serde::{Deserialize, Serialize};
use std::process::ExitStatus;
use std::time::{Duration, Instant};
use wait::WaitPolicy;

/// What to do when a worker terminates without publishing a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingResultPolicy {
    /// Abort the run with `MissingResult`
    #[default]
    Error,
    /// Count the worker as 0.0 and log a warning
    Zero,
}

/// Per-run orchestration options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunOptions {
    pub missing_result: MissingResultPolicy,
    pub wait: WaitPolicy,
}

/// Orchestrator lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    ResourcesCreated,
    WorkersSpawned,
    AwaitingCompletion,
    Aggregating,
    ResourcesReleased,
    Done,
    Failed,
}

impl RunState {
    /// Whether `next` is a legal successor of `self`
    pub fn can_advance_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Init, ResourcesCreated)
                | (ResourcesCreated, WorkersSpawned)
                | (WorkersSpawned, AwaitingCompletion)
                | (AwaitingCompletion, Aggregating)
                | (Aggregating, ResourcesReleased)
                | (ResourcesReleased, Done)
        ) || (next == Failed && !matches!(self, Done | Failed))
    }
}

/// Tracks and logs state transitions of one run
#[derive(Debug)]
struct Lifecycle {
    state: RunState,
}

impl Lifecycle {
    fn new() -> Self {
        Self { state: RunState::Init }
    }

    fn advance(&mut self, next: RunState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::debug!(from = ?self.state, to = ?next, "run state");
        self.state = next;
    }
}

/// Outcome of one worker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerOutcome {
    pub index: usize,
    pub partition: Partition,
    /// Partial sum as counted in the total
    pub partial: f32,
    /// False when the worker never published and was counted as zero
    pub contributed: bool,
    pub exit_code: Option<i32>,
}

/// Result of a successful run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub transport: TransportKind,
    pub plan: PartitionPlan,
    pub workers: Vec<WorkerOutcome>,
    pub total: f64,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn clamp_warning(&self) -> Option<ClampWarning> {
        self.plan.clamp_warning()
    }

    pub fn effective_workers(&self) -> usize {
        self.plan.worker_count()
    }

    /// Workers that terminated without publishing (only under `MissingResultPolicy::Zero`)
    pub fn missing_workers(&self) -> Vec<usize> {
        self.workers
            .iter()
            .filter(|w| !w.contributed)
            .map(|w| w.index)
            .collect()
    }
}

/// Runs sum-of-squares jobs across worker processes
///
/// # Example
///
/// ```no_run
/// use ipcsum::coordinator::{launcher::CommandLauncher, Orchestrator, RunOptions};
/// use ipcsum::input::NumberSequence;
/// use ipcsum::transport::TransportKind;
///
/// let launcher = CommandLauncher::current_exe()?;
/// let orchestrator = Orchestrator::new(launcher, RunOptions::default());
/// let numbers = NumberSequence::from(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
///
/// let report = orchestrator.run(&numbers, 2, TransportKind::SharedMemory)?;
/// assert_eq!(report.total, 55.0);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Orchestrator<L: ProcessLauncher> {
    launcher: L,
    options: RunOptions,
}

impl<L: ProcessLauncher> Orchestrator<L> {
    pub fn new(launcher: L, options: RunOptions) -> Self {
        Self { launcher, options }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Compute the sum of squares of `sequence` with `requested` workers
    ///
    /// # Errors
    ///
    /// - `InvalidInput` before any resource exists
    /// - `ResourceAcquisition` if the transport cannot be created
    /// - `Spawn`, `Transport`, `Wait` or `WorkerTimeout` once workers run
    /// - `MissingResult` under `MissingResultPolicy::Error`
    pub fn run(
        &self,
        sequence: &NumberSequence,
        requested: usize,
        kind: TransportKind,
    ) -> RunResult<RunReport> {
        let mut lifecycle = Lifecycle::new();
        let result = self.execute(sequence, requested, kind, &mut lifecycle);
        if let Err(e) = &result {
            tracing::debug!(state = ?lifecycle.state, "run failed: {}", e);
            lifecycle.advance(RunState::Failed);
        }
        result
    }

    fn execute(
        &self,
        sequence: &NumberSequence,
        requested: usize,
        kind: TransportKind,
        lifecycle: &mut Lifecycle,
    ) -> RunResult<RunReport> {
        let started = Instant::now();

        let plan = PartitionPlan::new(sequence.len(), requested)?;
        if let Some(warning) = plan.clamp_warning() {
            tracing::warn!(
                requested = warning.requested,
                effective = warning.effective,
                "worker count clamped"
            );
        }

        let run_id = RunId::generate();
        tracing::debug!(run = %run_id, %kind, elements = sequence.len(), workers = plan.worker_count(), "starting run");

        let mut transport: Box<dyn Transport + '_> = match kind {
            TransportKind::SharedMemory => Box::new(SharedMemoryTransport::create(
                sequence.as_slice(),
                plan.worker_count(),
                &run_id,
            )?),
            TransportKind::Pipe => Box::new(PipeTransport::create(sequence.as_slice(), &plan)?),
        };
        lifecycle.advance(RunState::ResourcesCreated);

        let collected = self.drive(&plan, transport.as_mut(), lifecycle);

        transport.release();
        drop(transport);

        let (slots, statuses) = collected?;
        lifecycle.advance(RunState::ResourcesReleased);

        let workers = self.resolve(&plan, &slots, &statuses)?;

        let mut aggregator = ResultAggregator::new();
        for outcome in &workers {
            aggregator.add_worker(outcome.index, outcome.partial);
        }
        debug_assert_eq!(aggregator.num_workers(), plan.worker_count());
        let total = aggregator.aggregate();
        lifecycle.advance(RunState::Done);

        Ok(RunReport {
            run_id: run_id.to_string(),
            transport: kind,
            plan,
            workers,
            total,
            elapsed: started.elapsed(),
        })
    }

    /// Spawn, feed, await and collect; resources are released by the caller
    fn drive<'t>(
        &self,
        plan: &PartitionPlan,
        transport: &mut (dyn Transport + 't),
        lifecycle: &mut Lifecycle,
    ) -> RunResult<(Vec<Option<f32>>, Vec<ExitStatus>)> {
        let mut workers: Vec<WorkerHandle> = Vec::with_capacity(plan.worker_count());

        for (index, partition) in plan.partitions().iter().enumerate() {
            let spawned = transport.invocation(index, partition).and_then(|invocation| {
                self.launcher
                    .spawn(invocation)
                    .map_err(|source| RunError::Spawn { worker: index, source })
            });
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    abort(&mut workers);
                    return Err(e);
                }
            }
        }
        lifecycle.advance(RunState::WorkersSpawned);

        if let Err(e) = transport.send_inputs().and_then(|()| transport.receive_results()) {
            abort(&mut workers);
            return Err(e);
        }
        lifecycle.advance(RunState::AwaitingCompletion);

        let statuses = match self.options.wait.wait_all(&mut workers) {
            Ok(statuses) => statuses,
            Err(e) => {
                abort(&mut workers);
                return Err(e);
            }
        };
        lifecycle.advance(RunState::Aggregating);

        let slots = transport.collect()?;
        Ok((slots, statuses))
    }

    /// Apply the missing-result policy to the collected slots
    fn resolve(
        &self,
        plan: &PartitionPlan,
        slots: &[Option<f32>],
        statuses: &[ExitStatus],
    ) -> RunResult<Vec<WorkerOutcome>> {
        let mut outcomes = Vec::with_capacity(plan.worker_count());

        for (index, &partition) in plan.partitions().iter().enumerate() {
            let status = statuses.get(index).copied();
            let exit_code = status.and_then(|s| s.code());
            let describe = || status.map_or_else(|| "unknown".to_string(), |s| s.to_string());

            let (partial, contributed) = match slots.get(index).copied().flatten() {
                Some(value) => {
                    if let Some(s) = status.filter(|s| !s.success()) {
                        tracing::warn!(worker = index, status = %s, "worker published a result but exited unsuccessfully");
                    }
                    (value, true)
                }
                None => match self.options.missing_result {
                    MissingResultPolicy::Error => {
                        return Err(RunError::MissingResult {
                            worker: index,
                            status: describe(),
                        })
                    }
                    MissingResultPolicy::Zero => {
                        tracing::warn!(worker = index, status = %describe(), "no result published, counting as zero");
                        (0.0, false)
                    }
                },
            };

            outcomes.push(WorkerOutcome {
                index,
                partition,
                partial,
                contributed,
                exit_code,
            });
        }

        Ok(outcomes)
    }
}

/// Kill and reap every spawned worker
fn abort(workers: &mut [WorkerHandle]) {
    if !workers.is_empty() {
        tracing::debug!(workers = workers.len(), "aborting spawned workers");
    }
    for worker in workers.iter_mut() {
        worker.terminate();
    }
}
