//! CLI command implementations

pub mod locate;
pub mod run;
