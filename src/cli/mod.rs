//! CLI module for flowmux
//!
//! This module provides:
//! - Command implementations (run, validate, executors, tools)
//! - Output handlers (console, JSON, quiet)
//! - Signal handling for graceful cancellation

pub mod commands;
pub mod output;
pub mod signals;

pub use commands::{
    RunOptions, list_executors, list_tools, parse_input, parse_variables, run_graph,
    validate_graph,
};
pub use output::{OutputHandler, OutputMode, create_handler};
