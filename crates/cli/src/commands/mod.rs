//! Report subcommands

pub mod mfs;
pub mod summary;
pub mod trials;
