// SPDX-License-Identifier: Apache-2.0

//! Errors for the rate limit writer.

use std::io;

/// Errors that can occur when using the rate limiter.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The rate limit is invalid (zero bytes per second).
    #[error("Invalid rate limit: {rate}. Rate must be greater than zero.")]
    InvalidLimit {
        /// The invalid rate value.
        rate: u64,
    },

    /// Not enough tokens were available to cover the write.
    #[error("Throttled: requested {requested} bytes, {available} available")]
    Throttled {
        /// Size of the rejected write.
        requested: u64,

        /// Tokens observed in the bucket when the write was rejected.
        available: u64,
    },

    /// The background refill thread could not be started.
    #[error("Failed to start refill task: {0}")]
    RefillSpawn(#[source] io::Error),
}

impl Error {
    /// Returns true if `err` was produced by a throttled write.
    pub fn is_throttled(err: &io::Error) -> bool {
        matches!(
            err.get_ref().and_then(|inner| inner.downcast_ref::<Error>()),
            Some(Error::Throttled { .. })
        )
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match err {
            Error::Throttled { .. } => io::ErrorKind::WouldBlock,
            Error::InvalidLimit { .. } => io::ErrorKind::InvalidInput,
            Error::RefillSpawn(_) => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}
