//! Launching N identical jobs.
//!
//! Sequential mode drives every launch through the primary executor on the
//! calling thread. Parallel mode runs a bounded rayon pool where each
//! worker forks its own executor once and pulls launch indices from a
//! shared counter, so no connection is shared between threads.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::progress;
use remotekit::{CommandOutput, Executor, JobContext};

/// What each launch starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Workload {
    /// One run of the entrypoint
    Job { entrypoint: String },
    /// One agent for the sweep
    Sweep { sweep_id: String },
}

impl Workload {
    pub fn describe(&self) -> String {
        match self {
            Self::Job { entrypoint } => format!("job {entrypoint}"),
            Self::Sweep { sweep_id } => format!("sweep agent {sweep_id}"),
        }
    }
}

/// Result of launch number `index`.
#[derive(Debug)]
pub struct JobOutcome {
    pub index: usize,
    /// Trimmed output of the launch command (e.g. the scheduler's job id)
    pub result: Result<String>,
}

/// How to spread the launches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanOut {
    pub jobs: usize,
    pub parallelism: usize,
    pub sequential: bool,
}

/// Start a single launch on `executor`.
pub fn launch_one(
    executor: &mut dyn Executor,
    job: &JobContext,
    workload: &Workload,
) -> remotekit::Result<CommandOutput> {
    match workload {
        Workload::Job { entrypoint } => executor.launch_job(job, entrypoint),
        Workload::Sweep { sweep_id } => executor.sweep_agent(job, sweep_id),
    }
}

fn outcome(index: usize, result: remotekit::Result<CommandOutput>) -> JobOutcome {
    JobOutcome {
        index,
        result: result
            .map(|out| out.stdout.trim().to_string())
            .map_err(anyhow::Error::from),
    }
}

/// Launch `plan.jobs` copies of `workload`. Outcomes are ordered by index.
pub fn run(
    primary: &mut dyn Executor,
    job: &JobContext,
    workload: &Workload,
    plan: FanOut,
) -> Result<Vec<JobOutcome>> {
    let pb = progress::bar(plan.jobs as u64, &format!("Launching {}", workload.describe()));

    if plan.sequential || plan.jobs <= 1 {
        let outcomes = (0..plan.jobs)
            .map(|index| {
                let result = launch_one(&mut *primary, job, workload);
                pb.inc(1);
                outcome(index, result)
            })
            .collect();
        pb.finish_and_clear();
        return Ok(outcomes);
    }

    let workers = plan.jobs.min(plan.parallelism).max(1);
    log::debug!("Launching {} jobs on {workers} workers", plan.jobs);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .context("Could not start the launch pool")?;

    let next = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let outcomes = Mutex::new(Vec::with_capacity(plan.jobs));
    let shared: &dyn Executor = primary;

    pool.scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|_| {
                // one connection per worker, reopened only after a failed fork
                let mut executor = shared.fork();
                loop {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    if index >= plan.jobs {
                        break;
                    }
                    if executor.is_err() {
                        executor = shared.fork();
                    }
                    let done = match executor.as_mut() {
                        Ok(executor) => outcome(index, launch_one(executor.as_mut(), job, workload)),
                        Err(e) => JobOutcome {
                            index,
                            result: Err(anyhow::anyhow!("Could not open a connection: {e}")),
                        },
                    };

                    if done.result.is_err() {
                        failed.fetch_add(1, Ordering::Relaxed);
                        pb.set_message(format!("job {index} ✗"));
                    }
                    outcomes
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(done);
                    pb.inc(1);
                }
            });
        }
    });

    pb.finish_and_clear();
    log::debug!("{} of {} launches failed", failed.load(Ordering::Relaxed), plan.jobs);

    let mut outcomes = outcomes.into_inner().unwrap_or_else(PoisonError::into_inner);
    outcomes.sort_by_key(|o| o.index);
    Ok(outcomes)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use remotekit::{ExecutorSettings, MockConnector, MockTransport, SshExecutor};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn job() -> JobContext {
        JobContext {
            repo_url: "git@github.com:lab/project.git".to_string(),
            snapshot: "3f2a9c".to_string(),
            modules: vec!["python/3.7".to_string()],
            env: "base".to_string(),
        }
    }

    fn ready_executor(mock: &MockTransport) -> (SshExecutor, TempDir) {
        let project = TempDir::new().unwrap();
        let mut executor = SshExecutor::connect(
            Arc::new(MockConnector::new(mock.clone())),
            "build-host",
            ExecutorSettings::default(),
        )
        .unwrap();
        executor.setup_remote(None, project.path()).unwrap();
        (executor, project)
    }

    fn launches(mock: &MockTransport) -> Vec<String> {
        mock.commands()
            .into_iter()
            .filter(|c| c.contains("run_experiment.sh"))
            .collect()
    }

    fn train() -> Workload {
        Workload::Job {
            entrypoint: "train.py".to_string(),
        }
    }

    #[test]
    fn test_sequential_uses_primary_connection() {
        let mock = MockTransport::new("unused");
        let (mut executor, _project) = ready_executor(&mock);
        let plan = FanOut {
            jobs: 3,
            parallelism: 3,
            sequential: true,
        };

        let outcomes = run(&mut executor, &job(), &train(), plan).unwrap();
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| o.result.is_ok()));
        assert_eq!(launches(&mock).len(), 3);
        assert_eq!(mock.connections().len(), 1);
    }

    #[test]
    fn test_parallel_workers_get_own_connections() {
        let mock = MockTransport::new("unused");
        let (mut executor, _project) = ready_executor(&mock);
        let plan = FanOut {
            jobs: 4,
            parallelism: 2,
            sequential: false,
        };

        let outcomes = run(&mut executor, &job(), &train(), plan).unwrap();
        let indices: Vec<usize> = outcomes.iter().map(|o| o.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(launches(&mock).len(), 4);
        // one for the primary, one per worker
        assert_eq!(mock.connections().len(), 3);
        // scripts are bootstrapped once
        assert_eq!(
            mock.commands().iter().filter(|c| c.contains("mktemp")).count(),
            1
        );
    }

    #[test]
    fn test_single_job_skips_pool() {
        let mock = MockTransport::new("unused");
        let (mut executor, _project) = ready_executor(&mock);
        let plan = FanOut {
            jobs: 1,
            parallelism: 3,
            sequential: false,
        };

        run(&mut executor, &job(), &train(), plan).unwrap();
        assert_eq!(mock.connections().len(), 1);
    }

    #[test]
    fn test_failures_are_collected() {
        let mock = MockTransport::new("unused").fail("run_experiment.sh", 1, "no git");
        let (mut executor, _project) = ready_executor(&mock);
        let plan = FanOut {
            jobs: 2,
            parallelism: 2,
            sequential: false,
        };

        let outcomes = run(&mut executor, &job(), &train(), plan).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.result.is_err()));
    }

    #[test]
    fn test_output_is_trimmed() {
        let mock = MockTransport::new("unused").respond("run_experiment.sh", "started 42\n");
        let (mut executor, _project) = ready_executor(&mock);
        let plan = FanOut {
            jobs: 1,
            parallelism: 1,
            sequential: false,
        };

        let outcomes = run(&mut executor, &job(), &train(), plan).unwrap();
        assert_eq!(outcomes[0].result.as_ref().unwrap(), "started 42");
    }
}
