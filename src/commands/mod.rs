//! Command-line interface definitions and handlers for the bucketjoin CLI.

pub mod args;
pub mod bucket;
pub mod helpers;
pub mod inspect;
pub mod join;

pub use args::{Cli, Commands};
pub use bucket::run_bucket;
pub use inspect::{run_check, run_inspect};
pub use join::run_join;
