//! Command-line interface for building, querying, and inspecting HNSW
//! indices stored on disk.
//!
//! Input vectors come from a text file with one vector per line; the line
//! number (counting only vector lines, from zero) becomes the label.

mod commands;

pub use commands::{
    BuildCommand, BuildSummary, Cli, CliError, Command, CommandOutput, InspectCommand,
    InspectSummary, Metric, QueryCommand, QuerySummary, render_output, run_cli,
};
