//! Subcommand implementations

pub mod inspect;
pub mod replay;
pub mod score;
pub mod train;
