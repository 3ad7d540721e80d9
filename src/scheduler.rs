//! Where task start jobs run.

use std::collections::VecDeque;
use std::io;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs coordinator jobs off the caller's stack.
///
/// `submit` and `abort` never block on execution: every task start goes through
/// `schedule`, which must return before the job runs.
pub trait TaskScheduler: Send + Sync + 'static {
    fn schedule(&self, name: String, delay: Duration, job: Job) -> io::Result<()>;
}

/// Spawns one named OS thread per job.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadScheduler;

impl TaskScheduler for ThreadScheduler {
    fn schedule(&self, name: String, delay: Duration, job: Job) -> io::Result<()> {
        thread::Builder::new().name(name).spawn(move || {
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            job();
        })?;
        Ok(())
    }
}

/// Holds jobs until the host runs them, for hosts that own their event loop.
///
/// Delays are recorded but not waited for.
#[derive(Default)]
pub struct ManualScheduler {
    jobs: Mutex<VecDeque<ScheduledJob>>,
}

struct ScheduledJob {
    name: String,
    delay: Duration,
    job: Job,
}

impl ManualScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock_jobs().len()
    }

    /// Names and delays of queued jobs, oldest first.
    #[must_use]
    pub fn queued(&self) -> Vec<(String, Duration)> {
        self.lock_jobs()
            .iter()
            .map(|scheduled| (scheduled.name.clone(), scheduled.delay))
            .collect()
    }

    /// Runs the oldest job on the calling thread. Returns false when none was queued.
    pub fn run_next(&self) -> bool {
        let next = self.lock_jobs().pop_front();
        match next {
            Some(scheduled) => {
                (scheduled.job)();
                true
            }
            None => false,
        }
    }

    /// Runs jobs until the queue is empty, including jobs scheduled meanwhile.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }

    fn lock_jobs(&self) -> MutexGuard<'_, VecDeque<ScheduledJob>> {
        lock_unpoisoned(&self.jobs)
    }
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("pending", &self.pending())
            .finish()
    }
}

impl TaskScheduler for ManualScheduler {
    fn schedule(&self, name: String, delay: Duration, job: Job) -> io::Result<()> {
        self.lock_jobs().push_back(ScheduledJob { name, delay, job });
        Ok(())
    }
}

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn manual_scheduler_runs_jobs_in_order_on_demand() {
        let scheduler = ManualScheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for index in 0..3 {
            let order = Arc::clone(&order);
            scheduler
                .schedule(
                    format!("job-{index}"),
                    Duration::from_millis(index),
                    Box::new(move || order.lock().expect("order lock").push(index)),
                )
                .expect("schedule");
        }

        assert_eq!(scheduler.pending(), 3);
        assert_eq!(
            scheduler.queued()[2],
            ("job-2".to_string(), Duration::from_millis(2))
        );
        assert_eq!(scheduler.run_all(), 3);
        assert!(!scheduler.run_next());
        assert_eq!(*order.lock().expect("order lock"), vec![0, 1, 2]);
    }

    #[test]
    fn jobs_scheduled_by_jobs_run_in_the_same_drain() {
        let scheduler = Arc::new(ManualScheduler::new());
        let ran = Arc::new(AtomicUsize::new(0));

        let inner_scheduler = Arc::clone(&scheduler);
        let inner_ran = Arc::clone(&ran);
        scheduler
            .schedule(
                "outer".to_string(),
                Duration::ZERO,
                Box::new(move || {
                    inner_ran.fetch_add(1, Ordering::SeqCst);
                    let again = Arc::clone(&inner_ran);
                    inner_scheduler
                        .schedule(
                            "inner".to_string(),
                            Duration::ZERO,
                            Box::new(move || {
                                again.fetch_add(1, Ordering::SeqCst);
                            }),
                        )
                        .expect("schedule inner");
                }),
            )
            .expect("schedule outer");

        assert_eq!(scheduler.run_all(), 2);
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn thread_scheduler_runs_job_on_named_thread() {
        let (sender, receiver) = mpsc::channel();
        ThreadScheduler
            .schedule(
                "agent-session-test".to_string(),
                Duration::from_millis(1),
                Box::new(move || {
                    let name = thread::current().name().map(str::to_string);
                    sender.send(name).expect("send thread name");
                }),
            )
            .expect("spawn");

        assert_eq!(
            receiver
                .recv_timeout(Duration::from_secs(5))
                .expect("job ran"),
            Some("agent-session-test".to_string())
        );
    }
}
