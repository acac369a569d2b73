//! Process bootstrap: infrastructure connections and the readiness checks
//! built on top of them.

mod checks;
mod resources;

pub use checks::{CounterCheck, HistoryCheck, StreamLogCheck};
pub use resources::{Resources, Stores};
