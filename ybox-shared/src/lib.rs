//! Types shared between the ybox runtime library and the CLI.

pub mod constants;
pub mod errors;
