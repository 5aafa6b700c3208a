//! CLI module for vitrine - command-line interface and subcommands.

pub mod commands;

pub use commands::Cli;
