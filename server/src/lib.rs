//! Actionstream service: one binary, deployed per role.
//!
//! `ROLE` selects what the process runs. The ingestion API, the processing
//! workers and the analytics API can each run in their own container (the
//! docker-compose deployment does this) or all together in one process.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bootstrap;
pub mod config;
pub mod lifecycle;

pub use bootstrap::Resources;
pub use config::{Config, Role};
pub use lifecycle::Application;
