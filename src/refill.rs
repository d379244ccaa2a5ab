// SPDX-License-Identifier: Apache-2.0

//! Background refill of a [`TokenBucket`].
//!
//! The refill runs on a fixed wall-clock schedule, independent of write
//! activity, and tops the bucket up to capacity on every tick. It can be
//! driven by a dedicated OS thread or by a task on a tokio runtime. Either
//! way the task owns a stop signal and ends when its [`RefillTask`] handle
//! is stopped or dropped.

use crate::tokenbucket::TokenBucket;
use crate::Error;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

/// Name given to the refill thread.
const THREAD_NAME: &str = "ratelimit-refill";

/// Handle to a running refill task.
#[derive(Debug)]
pub(crate) struct RefillTask {
    driver: Option<Driver>,
}

#[derive(Debug)]
enum Driver {
    Thread {
        /// Dropping this sender disconnects the channel and ends the loop.
        stop: flume::Sender<()>,
        handle: thread::JoinHandle<()>,
    },
    Tokio {
        stop: oneshot::Sender<()>,
        handle: tokio::task::JoinHandle<()>,
    },
}

impl RefillTask {
    /// Starts refilling `bucket` every `interval` on a dedicated thread.
    ///
    /// # Errors
    ///
    /// Returns `Error::RefillSpawn` if the thread cannot be created.
    pub(crate) fn spawn_thread(bucket: Arc<TokenBucket>, interval: Duration) -> Result<Self, Error> {
        let (stop, stopped) = flume::bounded(1);
        let handle = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || run_thread(&bucket, &stopped, interval))
            .map_err(Error::RefillSpawn)?;

        debug!(?interval, "refill thread started");
        Ok(RefillTask {
            driver: Some(Driver::Thread { stop, handle }),
        })
    }

    /// Starts refilling `bucket` every `interval` as a task on `runtime`.
    pub(crate) fn spawn_tokio(
        bucket: Arc<TokenBucket>,
        interval: Duration,
        runtime: &tokio::runtime::Handle,
    ) -> Self {
        let (stop, stopped) = oneshot::channel();
        let handle = runtime.spawn(run_tokio(bucket, stopped, interval));

        debug!(?interval, "refill task started");
        RefillTask {
            driver: Some(Driver::Tokio { stop, handle }),
        }
    }

    /// Returns true until the refill loop has exited.
    pub(crate) fn is_running(&self) -> bool {
        match &self.driver {
            Some(Driver::Thread { handle, .. }) => !handle.is_finished(),
            Some(Driver::Tokio { handle, .. }) => !handle.is_finished(),
            None => false,
        }
    }

    /// Signals the refill loop to stop.
    ///
    /// For the thread driver this also waits for the thread to exit.
    pub(crate) fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        match self.driver.take() {
            Some(Driver::Thread { stop, handle }) => {
                drop(stop);
                if handle.join().is_err() {
                    debug!("refill thread panicked");
                }
            }
            Some(Driver::Tokio { stop, handle: _ }) => {
                // The task may already be gone with its runtime.
                let _ = stop.send(());
            }
            None => {}
        }
    }
}

impl Drop for RefillTask {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn tick(bucket: &TokenBucket) {
    let added = bucket.refill(bucket.capacity());
    trace!(added, available = bucket.available(), "bucket refilled");
}

fn run_thread(bucket: &TokenBucket, stopped: &flume::Receiver<()>, interval: Duration) {
    let mut deadline = Instant::now() + interval;
    loop {
        match stopped.recv_deadline(deadline) {
            Err(flume::RecvTimeoutError::Timeout) => {
                tick(bucket);
                deadline += interval;

                // Skip ticks missed while descheduled; refills saturate anyway.
                let now = Instant::now();
                while deadline <= now {
                    deadline += interval;
                }
            }
            Ok(()) | Err(flume::RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("refill thread stopped");
}

async fn run_tokio(bucket: Arc<TokenBucket>, mut stopped: oneshot::Receiver<()>, interval: Duration) {
    let start = tokio::time::Instant::now() + interval;
    let mut ticker = tokio::time::interval_at(start, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = &mut stopped => break,
            _ = ticker.tick() => tick(&bucket),
        }
    }
    debug!("refill task stopped");
}
