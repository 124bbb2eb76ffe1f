//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - chat: send one message and print the answer
//! - set-api-key / set-model: persist credentials
//! - show: print the current settings

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Default size of the answer buffer, in bytes
pub const DEFAULT_MAX_OUTPUT: usize = 16 * 1024;

/// clawchat - streaming chat completions, direct or through a proxy tunnel
#[derive(Parser, Debug)]
#[command(name = "clawchat")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send a message and print the answer
    Chat {
        /// A JSON messages array, or plain text sent as one user message
        message: String,

        /// System prompt
        #[arg(short, long, default_value = "")]
        system: String,

        /// Send through the proxy tunnel instead of directly
        #[arg(short, long)]
        proxy: bool,

        /// Size of the answer buffer; longer answers are truncated
        #[arg(long, default_value_t = DEFAULT_MAX_OUTPUT)]
        max_output: usize,
    },

    /// Save the API key
    SetApiKey {
        /// Anthropic API key
        key: String,
    },

    /// Save the model identifier
    SetModel {
        /// Model name, e.g. claude-sonnet-4-20250514
        model: String,
    },

    /// Show the current model and whether an API key is set
    Show,
}
