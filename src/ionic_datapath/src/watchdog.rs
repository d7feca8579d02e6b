/*
Copyright 2026  The Hyperlight Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! Doorbell watchdog.
//!
//! A doorbell write can be lost or arrive while the device is not polling.
//! When a queue still has work outstanding but made no progress, the engine
//! re-rings the doorbell once the watchdog interval has elapsed since the
//! last ring.

use core::time::Duration;

/// How the interval evolves after a watchdog-triggered doorbell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Keep the same interval.
    Fixed,
    /// Double the interval, up to `max`, until progress is made.
    Exponential { max: Duration },
}

#[derive(Debug, Clone)]
pub struct Watchdog {
    backoff: Backoff,
    min_interval: Duration,
    interval: Duration,
    last_doorbell: Duration,
}

impl Watchdog {
    pub fn new(interval: Duration, backoff: Backoff) -> Self {
        Self {
            backoff,
            min_interval: interval,
            interval,
            last_doorbell: Duration::ZERO,
        }
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[inline]
    pub fn last_doorbell(&self) -> Duration {
        self.last_doorbell
    }

    /// A doorbell was rung because the queue made progress.
    pub fn progress(&mut self, now: Duration) {
        self.last_doorbell = now;
        self.interval = self.min_interval;
    }

    /// Decide whether an idle queue with `outstanding` work needs a doorbell.
    ///
    /// Returns true at most once per interval; the caller must ring when it does.
    pub fn poll(&mut self, now: Duration, outstanding: bool) -> bool {
        if !outstanding || now.saturating_sub(self.last_doorbell) < self.interval {
            return false;
        }

        self.last_doorbell = now;
        if let Backoff::Exponential { max } = self.backoff {
            self.interval = self.interval.saturating_mul(2).min(max);
        }
        true
    }

    pub(crate) fn reset(&mut self, now: Duration) {
        self.progress(now);
    }
}
