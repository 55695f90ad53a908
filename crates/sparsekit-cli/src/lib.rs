//! Sparsekit CLI Library
//!
//! This crate provides the command-line interface for sparsekit embedding
//! checkpoints:
//!
//! - **Inspect**: Summarize a checkpoint file and its per-device distribution
//! - **Build**: Create a store from a configuration, insert keys and dump it
//!
//! # Example
//!
//! ```bash
//! # Summarize a checkpoint as it would be sharded over 4 devices
//! sparsekit inspect --path /ckpt/item.emb --vector-size 16 --devices 4
//!
//! # Build a checkpoint from a key list
//! sparsekit build --config store.json --keys keys.txt --output /ckpt/item.emb --devices 2
//! ```

pub mod commands;

use clap::{Parser, Subcommand};

pub use commands::{BuildCommand, BuildReport, InspectCommand, InspectReport};

/// Sparsekit - sharded sparse embedding parameter tools
#[derive(Parser, Debug)]
#[command(name = "sparsekit")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Summarize an embedding checkpoint
    Inspect(InspectCommand),

    /// Build an embedding checkpoint from a key list
    Build(BuildCommand),
}
