//! CLI command handlers, one file per command.

mod fetch;
mod probe;

pub use fetch::{run_fetch, FetchOptions};
pub use probe::run_probe;
