/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::fmt::{self, Display, Formatter};
use std::time::Duration;

/// One snapshot of the pool counters.
///
/// Derived quantities hold exactly at the moment the queue lock was taken;
/// `total_cpu` is read from a separate accumulator and may lag by one task,
/// which is acceptable for status display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub num_proc: u64,
    pub issued: u64,
    pub waiting: u64,
    pub in_progress: u64,
    pub done: u64,
    pub failed: u64,
    pub total_cpu: Duration,
}

impl Status {
    pub fn not_done(&self) -> u64 {
        self.issued.saturating_sub(self.done)
    }

    /// Average wall time per finished task. None until something finished.
    pub fn average_time_per_call(&self) -> Option<Duration> {
        if self.done == 0 {
            return None;
        }
        Some(self.total_cpu / self.done as u32)
    }

    /// Estimated time to drain the remaining tasks over `num_proc` workers.
    pub fn eta(&self) -> Option<Duration> {
        if self.num_proc == 0 {
            return None;
        }
        let avg = self.average_time_per_call()?;
        Some(avg * self.not_done() as u32 / self.num_proc as u32)
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TASKS in prog: {} wait: {} done: {} fail: {} tot: {} ",
            self.in_progress, self.waiting, self.done, self.failed, self.issued
        )?;
        match (self.average_time_per_call(), self.eta()) {
            (Some(avg), Some(eta)) => {
                let eta = eta.as_secs();
                let hours = eta / 3600;
                let minutes = (eta % 3600) / 60;
                let seconds = eta % 60;
                write!(
                    f,
                    "TIME avrg per task: {:.2e}s, remaining: {}h:{:0>2}m:{:0>2}s",
                    avg.as_secs_f64(),
                    hours,
                    minutes,
                    seconds
                )
            }
            _ => write!(f, "TIME ???"),
        }
    }
}
