//! `Redis` adapter for Actionstream: realtime per-user action counters.
//!
//! # Keys
//!
//! - `user:{userId}:actions`: the counter, a plain integer
//! - `event:{eventId}:counted`: marker set the first time an event is counted,
//!   expiring after [`RedisCounterConfig::marker_ttl`]
//!
//! Marker and increment are applied in one Lua script, so a redelivered event
//! whose marker still exists leaves the counter untouched.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod counter;

pub use counter::{RedisCounterConfig, RedisCounterStore};
