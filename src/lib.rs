// SPDX-License-Identifier: Apache-2.0

//! Rate limiting write filter.
//!
//! This crate provides a token bucket-based [`Limiter`] that wraps a byte
//! sink and caps the throughput flowing into it at a fixed number of bytes
//! per second. Writes that cannot be covered immediately are rejected rather
//! than delayed.

mod config;
mod error;
mod limiter;
mod refill;
mod tokenbucket;

pub use config::{Config, Limit, REFILL_INTERVAL};
pub use error::Error;
pub use limiter::{Limiter, Stats};
pub use tokenbucket::TokenBucket;
