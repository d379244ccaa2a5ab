// SPDX-License-Identifier: Apache-2.0

//! Configuration for the rate limit writer.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Interval between two refills of the bucket.
pub const REFILL_INTERVAL: Duration = Duration::from_secs(1);

/// Default rate: 1 MiB per second.
const DEFAULT_BYTES_PER_SECOND: u64 = 1024 * 1024;

/// Rate limit expressed as bytes per second.
/// Must be greater than zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit(u64);

impl Limit {
    /// Creates a new rate limit from bytes per second.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidLimit` if the rate is zero.
    pub fn new(bytes_per_second: u64) -> Result<Self, Error> {
        if bytes_per_second == 0 {
            return Err(Error::InvalidLimit {
                rate: bytes_per_second,
            });
        }
        Ok(Limit(bytes_per_second))
    }

    /// Returns the rate as bytes per second.
    ///
    /// This is also the bucket capacity and the amount added per refill.
    pub fn bytes_per_second(self) -> u64 {
        self.0
    }
}

/// Configuration for a [`Limiter`](crate::Limiter).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Throughput ceiling in bytes per second. Also the maximum burst.
    #[serde(default = "default_bytes_per_second")]
    pub bytes_per_second: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bytes_per_second: DEFAULT_BYTES_PER_SECOND,
        }
    }
}

impl Config {
    /// Create a configuration for the given rate.
    pub fn new(bytes_per_second: u64) -> Self {
        Self { bytes_per_second }
    }

    /// Validate the configuration into a [`Limit`].
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidLimit` if the configured rate is zero.
    pub fn limit(&self) -> Result<Limit, Error> {
        Limit::new(self.bytes_per_second)
    }
}

fn default_bytes_per_second() -> u64 {
    DEFAULT_BYTES_PER_SECOND
}
