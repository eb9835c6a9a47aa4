/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::binding::NamedArgs;
use crate::fingerprint::Digest;

/// One not-yet-cached call waiting for a worker.
#[derive(Debug, Clone)]
pub struct Task {
    pub args: NamedArgs,
    pub digest: Digest,
}

/// Captured outcome of a call that failed inside a worker.
#[derive(Debug, Clone)]
pub struct Failure {
    pub message: String,
    pub trace: String,
}

impl Failure {
    pub fn from_error(err: &anyhow::Error) -> Self {
        Failure {
            message: format!("{:#}", err),
            trace: format!("{:?}", err),
        }
    }

    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "worker panicked".to_owned());
        Failure {
            trace: format!("panic in worker: {}", message),
            message,
        }
    }
}

/// What the queue knows about a digest.
#[derive(Debug)]
pub enum Probe {
    /// A previous evaluation failed; the entry is handed out once and cleared
    /// so later epochs can retry.
    Failed(Failure),
    /// Admitted and not resolved yet.
    Pending,
    /// Never seen (or already resolved).
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    pub issued: u64,
    pub waiting: u64,
    pub pending: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Inner {
    fifo: VecDeque<Task>,
    pending: HashSet<Digest>,
    failures: HashMap<Digest, Failure>,
    issued: u64,
    failed: u64,
}

/// De-duplicating work queue shared between the caller and the workers.
///
/// One mutex guards the FIFO, the pending set, the failure map and the epoch
/// counters, so admission (check then insert) is atomic and a digest is
/// admitted at most once per epoch.
#[derive(Default)]
pub struct TaskQueue {
    inner: Mutex<Inner>,
    ready: Condvar,
}

impl TaskQueue {
    pub fn new() -> Self {
        TaskQueue::default()
    }

    pub fn probe(&self, digest: &Digest) -> Probe {
        let mut inner = self.inner.lock().unwrap();
        if let Some(failure) = inner.failures.remove(digest) {
            return Probe::Failed(failure);
        }
        if inner.pending.contains(digest) {
            return Probe::Pending;
        }
        Probe::Unknown
    }

    /// Admits a task unless its digest is already pending. Returns whether the
    /// task was actually enqueued.
    pub fn admit(&self, task: Task) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if !inner.pending.insert(task.digest) {
            return false;
        }
        inner.fifo.push_back(task);
        inner.issued += 1;
        self.ready.notify_one();
        true
    }

    /// FIFO pop, blocking up to `timeout`. The bound keeps worker shutdown
    /// latency at one poll interval.
    pub fn pull(&self, timeout: Duration) -> Option<Task> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(task) = inner.fifo.pop_front() {
                return Some(task);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self.ready.wait_timeout(inner, deadline - now).unwrap();
            inner = guard;
        }
    }

    /// Common exit point for a finished task: records the failure, if any,
    /// then removes the digest from the pending set, under one lock. A cache
    /// write performed before this call is therefore visible to anyone who
    /// observes the digest as no longer pending.
    pub fn resolve(&self, digest: &Digest, failure: Option<Failure>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(failure) = failure {
            inner.failures.insert(*digest, failure);
            inner.failed += 1;
        }
        inner.pending.remove(digest);
    }

    /// Everything admitted has been resolved.
    pub fn is_drained(&self) -> bool {
        self.inner.lock().unwrap().pending.is_empty()
    }

    /// Starts a new accounting epoch: tasks left over in the queue count as
    /// issued again, the failure tally restarts.
    pub fn begin_epoch(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.issued = inner.fifo.len() as u64;
        inner.failed = 0;
    }

    /// Consistent snapshot of the raw counters (one lock).
    pub fn counters(&self) -> Counters {
        let inner = self.inner.lock().unwrap();
        Counters {
            issued: inner.issued,
            waiting: inner.fifo.len() as u64,
            pending: inner.pending.len() as u64,
            failed: inner.failed,
        }
    }
}
