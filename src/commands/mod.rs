// src/commands/mod.rs
//! Command handlers for the cairn CLI

mod check;
mod force;
mod system;

pub use check::cmd_check;
pub use force::cmd_force_status;
pub use system::cmd_completions;
