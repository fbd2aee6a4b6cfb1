//! Running maintainer lookups on a bounded worker pool.

use super::classify::JobRecord;
use super::memo::{MaintainerMemo, Resolution};
use super::resolver::{Evaluator, resolve};
use crate::context::Context;
use crossbeam_channel::bounded;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};
use std::thread;
use tracing::{debug, error};

/// Resolution per full job name. Iterates in job-name order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResultTable {
    entries: BTreeMap<String, Resolution>,
}

impl ResultTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, job_name: impl Into<String>, resolution: Resolution) {
        self.entries.insert(job_name.into(), resolution);
    }

    pub fn get(&self, job_name: &str) -> Option<&Resolution> {
        self.entries.get(job_name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Resolution)> {
        self.entries.iter().map(|(job, res)| (job.as_str(), res))
    }

    /// Number of jobs whose lookup failed.
    pub fn failures(&self) -> usize {
        self.entries.values().filter(|r| r.is_failure()).count()
    }
}

/// Fans lookups out over a fixed number of worker threads.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    workers: usize,
    show_progress: bool,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(default_workers())
    }
}

/// One worker per available CPU.
pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl Dispatcher {
    /// A dispatcher with `workers` threads (at least one).
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            show_progress: false,
        }
    }

    /// Show a progress bar on stderr while dispatching.
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Resolve every job and return once all of them have an entry.
    ///
    /// Jobs are handed out over a bounded channel; completion order is unspecified. A
    /// resolver panic is recorded as a failure for that job only.
    pub fn dispatch(
        &self,
        jobs: &[(JobRecord, Context)],
        memo: &MaintainerMemo,
        evaluator: &dyn Evaluator,
    ) -> ResultTable {
        if jobs.is_empty() {
            return ResultTable::new();
        }

        let workers = self.workers.min(jobs.len());
        let progress = self.progress_bar(jobs.len());
        let results = Mutex::new(ResultTable::new());
        let (task_tx, task_rx) = bounded::<&(JobRecord, Context)>(workers * 2);

        debug!(jobs = jobs.len(), workers, "Dispatching maintainer lookups");

        thread::scope(|s| {
            for worker_id in 0..workers {
                let rx = task_rx.clone();
                let results = &results;
                let progress = &progress;

                s.spawn(move || {
                    let mut handled = 0usize;
                    while let Ok((job, context)) = rx.recv() {
                        let resolution = panic::catch_unwind(AssertUnwindSafe(|| {
                            resolve(job, *context, memo, evaluator)
                        }))
                        .unwrap_or_else(|_| {
                            error!(job = %job.job_name, worker_id, "Resolver panicked");
                            Resolution::Failed("resolver panicked".to_string())
                        });

                        results
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .insert(job.job_name.clone(), resolution);
                        progress.inc(1);
                        handled += 1;
                    }
                    debug!(worker_id, handled, "Worker drained");
                });
            }
            drop(task_rx);

            for job in jobs {
                if task_tx.send(job).is_err() {
                    break;
                }
            }
            drop(task_tx);
        });

        progress.finish_and_clear();
        results.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} lookups ({eta})")
        {
            pb.set_style(style.progress_chars("█▓▒░  "));
        }
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maintainers::classify::classify;
    use crate::maintainers::memo::Maintainer;
    use crate::maintainers::resolver::EvalError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Counts calls; attributes starting with `broken` fail, `panic` panics.
    #[derive(Default)]
    struct CountingEvaluator {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl Evaluator for CountingEvaluator {
        fn maintainers(
            &self,
            _context: Context,
            attr_path: &str,
        ) -> Result<Vec<Maintainer>, EvalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            if attr_path.starts_with("broken") {
                return Err(EvalError::Exit {
                    status: "exit status: 1".into(),
                    stderr: String::new(),
                });
            }
            if attr_path.starts_with("panic") {
                panic!("evaluator bug");
            }
            let pkg = attr_path.split('.').next().unwrap_or_default();
            Ok(vec![Maintainer::with_github(format!("{pkg}-maintainer"))])
        }
    }

    fn jobs(names: &[String]) -> Vec<(JobRecord, Context)> {
        names
            .iter()
            .map(|name| {
                let line = format!("{name} 1 pkg x86_64-linux Failed");
                (classify(&line, Context::NixOs).unwrap(), Context::NixOs)
            })
            .collect()
    }

    #[test]
    fn test_empty_dispatch_makes_no_calls() {
        let evaluator = CountingEvaluator::default();
        let table = Dispatcher::new(4).dispatch(&[], &MaintainerMemo::new(), &evaluator);
        assert!(table.is_empty());
        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_hundred_jobs_ten_keys() {
        let names: Vec<String> = (0..100)
            .map(|i| format!("pkg{}.system{}", i % 10, i / 10))
            .collect();
        let evaluator = CountingEvaluator {
            delay: Duration::from_millis(5),
            ..Default::default()
        };
        let memo = MaintainerMemo::new();

        let table = Dispatcher::new(4).dispatch(&jobs(&names), &memo, &evaluator);

        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 10);
        assert_eq!(table.len(), 100);
        assert_eq!(memo.len(), 10);
        assert_eq!(
            table.get("pkg3.system7").unwrap().maintainers(),
            &[Maintainer::with_github("pkg3-maintainer")]
        );
    }

    #[test]
    fn test_failures_do_not_abort_siblings() {
        let names: Vec<String> = ["broken.x86_64-linux", "panic.x86_64-linux", "ok.x86_64-linux"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let evaluator = CountingEvaluator::default();

        let table = Dispatcher::new(2).dispatch(&jobs(&names), &MaintainerMemo::new(), &evaluator);

        assert_eq!(table.len(), 3);
        assert_eq!(table.failures(), 2);
        assert!(!table.get("ok.x86_64-linux").unwrap().is_failure());
    }

    #[test]
    fn test_more_workers_than_jobs() {
        let names = vec!["a.x86_64-linux".to_string()];
        let evaluator = CountingEvaluator::default();
        let table = Dispatcher::new(64).dispatch(&jobs(&names), &MaintainerMemo::new(), &evaluator);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_zero_workers_is_clamped() {
        assert_eq!(Dispatcher::new(0).workers(), 1);
        assert!(default_workers() >= 1);
    }
}
