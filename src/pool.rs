/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Context;
use log::{error, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::binding::Call;
use crate::cache::{CacheFlag, CachedFunction, CallResult};
use crate::error::{CacheError, Result};
use crate::queue::{Failure, Probe, Task, TaskQueue};
use crate::status::Status;

/// How long a worker blocks on the queue before rechecking the stop flag.
/// Bounds shutdown latency.
const POLL_INTERVAL: Duration = Duration::from_millis(300);
const JOIN_POLL: Duration = Duration::from_millis(10);
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// How many workers to spawn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WorkerCount {
    /// One worker per available core.
    All,
    /// Explicit count if positive; `cores + k` if zero or negative
    /// (leaves `|k|` cores unused).
    Count(i64),
    /// Fraction of available cores, in (0, 1].
    Fraction(f64),
}

impl Default for WorkerCount {
    fn default() -> Self {
        WorkerCount::All
    }
}

impl WorkerCount {
    pub fn resolve(self) -> Result<usize> {
        let cores = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        self.resolve_for(cores)
    }

    pub fn resolve_for(self, cores: usize) -> Result<usize> {
        match self {
            WorkerCount::All => Ok(cores),
            WorkerCount::Fraction(f) => {
                if f > 0.0 && f <= 1.0 {
                    Ok((f * cores as f64) as usize)
                } else {
                    Err(CacheError::BadCall(format!(
                        "num_proc ({}, fraction) out of range (0, 1]",
                        f
                    )))
                }
            }
            WorkerCount::Count(k) if k > 0 => {
                if k as usize <= cores {
                    Ok(k as usize)
                } else {
                    Err(CacheError::BadCall(format!(
                        "num_proc ({}) must not be larger than the number of available cores ({})",
                        k, cores
                    )))
                }
            }
            WorkerCount::Count(k) => {
                if k > -(cores as i64) {
                    Ok((cores as i64 + k) as usize)
                } else {
                    Err(CacheError::BadCall(format!(
                        "num_proc ({}) must not be smaller than minus the number of available cores ({})",
                        k, cores
                    )))
                }
            }
        }
    }
}

impl FromStr for WorkerCount {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        if s == "all" {
            return Ok(WorkerCount::All);
        }
        if let Ok(k) = s.parse::<i64>() {
            return Ok(WorkerCount::Count(k));
        }
        if let Ok(f) = s.parse::<f64>() {
            return Ok(WorkerCount::Fraction(f));
        }
        Err(CacheError::BadCall(format!(
            "num_proc ('{}') is not a worker count",
            s
        )))
    }
}

/// What a pool-mode call produced.
#[derive(Debug, PartialEq)]
pub enum CallStatus<R> {
    /// The value was already cached.
    Ready(R),
    /// The arguments are queued (or already were); ask again after draining.
    Pending,
}

impl<R> CallStatus<R> {
    pub fn ready(self) -> Option<R> {
        match self {
            CallStatus::Ready(value) => Some(value),
            CallStatus::Pending => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, CallStatus::Pending)
    }
}

enum TaskOutcome {
    Done,
    Interrupted,
    Failed(Failure),
    FatalIo(CacheError),
}

struct Worker<R> {
    cache: Arc<CachedFunction<R>>,
    queue: Arc<TaskQueue>,
    stop: Arc<AtomicBool>,
    terminating: Arc<AtomicBool>,
    abandoned: Arc<AtomicBool>,
    cpu_time_ns: Arc<AtomicU64>,
}

impl<R> Worker<R>
where
    R: Serialize + DeserializeOwned,
{
    fn run(&self) {
        while !self.stop.load(Ordering::Relaxed) {
            let task = match self.queue.pull(POLL_INTERVAL) {
                Some(task) => task,
                None => continue,
            };
            let started = Instant::now();
            let outcome = self.run_task(&task);
            if self.abandoned.load(Ordering::Relaxed) {
                // killed from outside: no cleanup, pending entries stay
                return;
            }
            match outcome {
                TaskOutcome::Done => {
                    self.cpu_time_ns
                        .fetch_add(started.elapsed().as_nanos() as u64, Ordering::Relaxed);
                    self.queue.resolve(&task.digest, None);
                }
                TaskOutcome::Interrupted => {
                    // counts as done but is not cached, and is no failure
                    self.queue.resolve(&task.digest, None);
                }
                TaskOutcome::Failed(failure) => {
                    self.queue.resolve(&task.digest, Some(failure));
                }
                TaskOutcome::FatalIo(err) => {
                    error!("worker stops after i/o failure: {}", err);
                    self.queue.resolve(&task.digest, None);
                    return;
                }
            }
        }
    }

    fn run_task(&self, task: &Task) -> TaskOutcome {
        let path = self.cache.store().path_of(&task.digest);
        if self.cache.store().exists(&path) {
            return TaskOutcome::Done;
        }
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.cache.invoke(&task.args)));
        let value = match result {
            Err(payload) => return TaskOutcome::Failed(Failure::from_panic(payload.as_ref())),
            Ok(Err(err)) => return TaskOutcome::Failed(Failure::from_error(&err)),
            Ok(Ok(value)) => value,
        };
        if self.terminating.load(Ordering::Relaxed) {
            // terminate hit mid-call: discard the result, write nothing
            return TaskOutcome::Interrupted;
        }
        match self.cache.store().write(&path, &value) {
            Ok(()) => TaskOutcome::Done,
            Err(err) => TaskOutcome::FatalIo(err),
        }
    }
}

/// Cache wrapper plus a pool of worker threads crunching not-yet-cached
/// arguments in the background.
///
/// Without `start` every call behaves like the plain [`CachedFunction`]. With
/// the pool active, calls return immediately: `Ready` with the cached value or
/// `Pending` after admitting the arguments to the shared queue. After `start`,
/// exactly one of `wait`, `join` or `terminate` must be called, otherwise
/// workers keep polling the queue.
pub struct ParallelCache<R> {
    cache: Arc<CachedFunction<R>>,
    queue: Arc<TaskQueue>,
    stop: Arc<AtomicBool>,
    terminating: Arc<AtomicBool>,
    abandoned: Arc<AtomicBool>,
    cpu_time_ns: Arc<AtomicU64>,
    workers: Vec<JoinHandle<()>>,
    num_proc: usize,
    active: bool,
}

impl<R> ParallelCache<R>
where
    R: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(cache: CachedFunction<R>) -> Self {
        ParallelCache {
            cache: Arc::new(cache),
            queue: Arc::new(TaskQueue::new()),
            stop: Arc::new(AtomicBool::new(false)),
            terminating: Arc::new(AtomicBool::new(false)),
            abandoned: Arc::new(AtomicBool::new(false)),
            cpu_time_ns: Arc::new(AtomicU64::new(0)),
            workers: Vec::new(),
            num_proc: 0,
            active: false,
        }
    }

    pub fn cache(&self) -> &CachedFunction<R> {
        &self.cache
    }

    /// True between a successful `start` and the following `join` (or
    /// `terminate`/`kill`).
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Spawns the worker threads. Returns false (with a warning) if workers
    /// from a previous epoch are still registered.
    pub fn start(&mut self, num_proc: WorkerCount) -> anyhow::Result<bool> {
        if !self.workers.is_empty() {
            warn!("cannot start worker pool, previous workers are still registered");
            return Ok(false);
        }
        let count = num_proc.resolve()?;
        self.num_proc = count;
        self.queue.begin_epoch();
        self.cpu_time_ns.store(0, Ordering::Relaxed);
        self.stop.store(false, Ordering::Relaxed);
        self.terminating.store(false, Ordering::Relaxed);
        self.abandoned.store(false, Ordering::Relaxed);
        self.active = true;
        for _ in 0..count {
            let worker = Worker {
                cache: self.cache.clone(),
                queue: self.queue.clone(),
                stop: self.stop.clone(),
                terminating: self.terminating.clone(),
                abandoned: self.abandoned.clone(),
                cpu_time_ns: self.cpu_time_ns.clone(),
            };
            self.workers.push(thread::spawn(move || worker.run()));
        }
        info!("started {} workers", count);
        Ok(true)
    }

    /// Non-blocking call. In sync mode this is the plain cached call; in pool
    /// mode it returns `Ready` from the cache, raises a recorded failure for
    /// these arguments (once), or admits them and returns `Pending`.
    ///
    /// The pending check comes before the disk probe, so a caller never reads
    /// an entry a worker is still writing.
    pub fn call(&self, call: &Call) -> anyhow::Result<CallStatus<R>> {
        if !self.active {
            return Ok(CallStatus::Ready(self.cache.call(call)?));
        }
        let (named, digest) = self.cache.bind_and_hash(call)?;
        match self.queue.probe(&digest) {
            Probe::Failed(failure) => Err(CacheError::Exec {
                message: failure.message,
                trace: failure.trace,
            }
            .into()),
            Probe::Pending => Ok(CallStatus::Pending),
            Probe::Unknown => {
                let path = self.cache.store().path_of(&digest);
                if self.cache.store().exists(&path) {
                    let value = self.cache.store().read(&path).with_context(|| {
                        format!("failed to read cache entry at '{}'", path.display())
                    })?;
                    return Ok(CallStatus::Ready(value));
                }
                self.queue.admit(Task {
                    args: named,
                    digest,
                });
                Ok(CallStatus::Pending)
            }
        }
    }

    /// Flagged calls are a sync-mode facility only.
    pub fn call_flagged(
        &self,
        call: &Call,
        flag: Option<CacheFlag>,
    ) -> anyhow::Result<CallResult<R>> {
        if self.active {
            return Err(CacheError::BadCall(
                "cache flags cannot be used while the worker pool is active".to_owned(),
            )
            .into());
        }
        self.cache.call_flagged(call, flag)
    }

    pub fn set_result(&self, call: &Call, value: &R, overwrite: bool) -> anyhow::Result<()> {
        self.cache.set_result(call, value, overwrite)
    }

    /// Blocks until every admitted task is resolved, then joins the workers.
    /// With an interval given, a status line is logged each tick.
    pub fn wait(&mut self, status_interval: Option<Duration>) {
        match status_interval {
            Some(interval) => loop {
                thread::sleep(interval);
                info!("{}", self.status());
                if self.queue.is_drained() {
                    break;
                }
            },
            None => {
                while !self.queue.is_drained() {
                    thread::sleep(DRAIN_POLL);
                }
            }
        }
        self.join(None);
    }

    /// Cooperative shutdown: workers finish their current task and exit.
    /// Returns true iff every worker exited within the timeout; only then is
    /// the registry cleared. `None` waits forever.
    pub fn join(&mut self, timeout: Option<Duration>) -> bool {
        self.stop.store(true, Ordering::Relaxed);
        self.active = false;
        if self.workers.is_empty() {
            return true;
        }
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.workers.iter().all(|w| w.is_finished()) {
                for worker in self.workers.drain(..) {
                    let _ = worker.join();
                }
                info!("all workers joined");
                return true;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return false;
            }
            thread::sleep(JOIN_POLL);
        }
    }

    /// Forced shutdown: like `join`, but results of calls that are in flight
    /// are discarded (`Interrupted`), counting as done without being cached.
    pub fn terminate(&mut self, timeout: Option<Duration>) -> bool {
        info!("terminate worker pool");
        self.terminating.store(true, Ordering::Relaxed);
        self.join(timeout)
    }

    /// Last resort: abandons the workers with no chance to clean up and
    /// clears the registry. Pending entries are left as-is.
    pub fn kill(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.abandoned.store(true, Ordering::Relaxed);
        self.active = false;
        let abandoned = self.workers.drain(..).count();
        if abandoned > 0 {
            warn!(
                "killed {} workers without cleanup, pending entries are left as-is",
                abandoned
            );
        }
    }

    pub fn status(&self) -> Status {
        let counters = self.queue.counters();
        Status {
            num_proc: self.num_proc as u64,
            issued: counters.issued,
            waiting: counters.waiting,
            in_progress: counters.pending.saturating_sub(counters.waiting),
            done: counters.issued.saturating_sub(counters.pending),
            failed: counters.failed,
            total_cpu: Duration::from_nanos(self.cpu_time_ns.load(Ordering::Relaxed)),
        }
    }
}

impl<R> Drop for ParallelCache<R> {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.stop.store(true, Ordering::Relaxed);
            warn!("worker pool dropped with workers still registered, signaling them to stop");
        }
    }
}
