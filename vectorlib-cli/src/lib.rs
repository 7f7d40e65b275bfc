//! Support library for the vectorlib CLI binary.
//!
//! Exposes the command pipeline and logging setup so tests and doctests can
//! drive commands without forking a subprocess.

pub mod cli;
pub mod logging;
