//! CLI module for clawchat - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for chatting and for
//! managing the stored API key and model.

pub mod commands;

pub use commands::Cli;
