//! CLI subcommands.

pub mod migrate;
pub mod sample;
pub mod seed;
