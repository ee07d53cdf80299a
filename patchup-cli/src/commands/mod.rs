//! CLI commands.

mod common;
pub mod status;
pub mod update;

pub use common::GlobalArgs;
