// Background build worker: a single FIFO job queue drained by one thread,
// so long forest builds never block the caller.

use crate::forest::Forest;
use crate::{Error, Result};
use parking_lot::{Condvar, Mutex, RwLock, RwLockUpgradableReadGuard};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info};

/// Work that can be handed to the background worker
pub trait BackgroundJob: Send + 'static {
    fn execute(self: Box<Self>);
    fn name(&self) -> &'static str;
}

struct JobQueue {
    jobs: Mutex<VecDeque<Box<dyn BackgroundJob>>>,
    condvar: Condvar,
    running: AtomicBool,
    completed: AtomicU64,
}

impl JobQueue {
    fn run(&self) {
        loop {
            let job = {
                let mut jobs = self.jobs.lock();
                while jobs.is_empty() && self.running.load(Ordering::Acquire) {
                    self.condvar.wait(&mut jobs);
                }
                match jobs.pop_front() {
                    Some(job) => job,
                    None => break,
                }
            };
            job.execute();
            self.completed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Background job system with one worker thread.
///
/// If the worker thread cannot be spawned, jobs run inline on the
/// submitting thread instead.
pub struct BackgroundJobSystem {
    queue: Arc<JobQueue>,
    has_worker: bool,
    submitted: AtomicU64,
}

impl BackgroundJobSystem {
    pub fn new() -> Self {
        let queue = Arc::new(JobQueue {
            jobs: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            running: AtomicBool::new(true),
            completed: AtomicU64::new(0),
        });

        let worker_queue = queue.clone();
        let has_worker = match thread::Builder::new()
            .name("rpforest-build".into())
            .spawn(move || worker_queue.run())
        {
            Ok(_) => true,
            Err(e) => {
                error!("failed to spawn background worker, builds will run inline: {e}");
                false
            }
        };

        Self {
            queue,
            has_worker,
            submitted: AtomicU64::new(0),
        }
    }

    pub fn submit(&self, job: Box<dyn BackgroundJob>) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        debug!(job = job.name(), "job submitted");
        if !self.has_worker || !self.queue.running.load(Ordering::Acquire) {
            job.execute();
            self.queue.completed.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let mut jobs = self.queue.jobs.lock();
        jobs.push_back(job);
        self.queue.condvar.notify_one();
    }

    pub fn pending_jobs(&self) -> usize {
        self.queue.jobs.lock().len()
    }

    pub fn jobs_submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn jobs_completed(&self) -> u64 {
        self.queue.completed.load(Ordering::Relaxed)
    }

    /// Stop accepting queued work; jobs already queued still run.
    pub fn shutdown(&self) {
        self.queue.running.store(false, Ordering::Release);
        self.queue.condvar.notify_all();
    }
}

impl Default for BackgroundJobSystem {
    fn default() -> Self {
        Self::new()
    }
}

static BACKGROUND_SYSTEM: OnceLock<Arc<BackgroundJobSystem>> = OnceLock::new();

/// Global background job system, started on first use
pub fn get_background_system() -> Arc<BackgroundJobSystem> {
    BACKGROUND_SYSTEM
        .get_or_init(|| Arc::new(BackgroundJobSystem::new()))
        .clone()
}

/// Completion handle for a background build
#[derive(Clone)]
pub struct BuildTicket {
    state: Arc<(Mutex<Option<Result<()>>>, Condvar)>,
}

impl BuildTicket {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new((Mutex::new(None), Condvar::new())),
        }
    }

    pub(crate) fn complete(&self, outcome: Result<()>) {
        let (slot, condvar) = &*self.state;
        *slot.lock() = Some(outcome);
        condvar.notify_all();
    }

    pub fn is_finished(&self) -> bool {
        self.state.0.lock().is_some()
    }

    /// Block until the build finishes and return its outcome.
    pub fn wait(&self) -> Result<()> {
        let (slot, condvar) = &*self.state;
        let mut outcome = slot.lock();
        loop {
            if let Some(result) = outcome.as_ref() {
                return result.clone();
            }
            condvar.wait(&mut outcome);
        }
    }

    /// Like [`wait`](BuildTicket::wait) but gives up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<()>> {
        let (slot, condvar) = &*self.state;
        let mut outcome = slot.lock();
        if outcome.is_none() {
            condvar.wait_for(&mut outcome, timeout);
        }
        outcome.clone()
    }
}

/// Clears the "build in progress" flag when dropped
pub(crate) struct BuildGuard {
    flag: Arc<AtomicBool>,
}

impl BuildGuard {
    /// Claim the flag, failing if another build holds it.
    pub(crate) fn acquire(flag: &Arc<AtomicBool>) -> Result<Self> {
        if flag.swap(true, Ordering::AcqRel) {
            return Err(Error::BuildInProgress);
        }
        Ok(Self { flag: flag.clone() })
    }
}

impl Drop for BuildGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Grows a new tree set under an upgradable read lock, then upgrades it to
/// install the trees. Queries keep running against the old trees until the
/// swap, while inserts wait for it.
pub struct ForestBuildJob {
    forest: Arc<RwLock<Forest>>,
    num_trees: usize,
    guard: BuildGuard,
    ticket: BuildTicket,
}

impl ForestBuildJob {
    pub(crate) fn new(
        forest: Arc<RwLock<Forest>>,
        num_trees: usize,
        guard: BuildGuard,
        ticket: BuildTicket,
    ) -> Self {
        Self {
            forest,
            num_trees,
            guard,
            ticket,
        }
    }
}

impl BackgroundJob for ForestBuildJob {
    fn execute(self: Box<Self>) {
        let Self {
            forest,
            num_trees,
            guard,
            ticket,
        } = *self;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<()> {
            let guard = forest.upgradable_read();
            let grown = guard.grow_trees(num_trees)?;
            RwLockUpgradableReadGuard::upgrade(guard).install(grown);
            Ok(())
        }))
        .unwrap_or_else(|_| Err(Error::BackgroundWorker("forest build panicked".into())));

        match &outcome {
            Ok(()) => info!(trees = num_trees, "background build finished"),
            Err(e) => error!("background build failed: {e}"),
        }

        drop(guard);
        ticket.complete(outcome);
    }

    fn name(&self) -> &'static str {
        "forest-build"
    }
}
