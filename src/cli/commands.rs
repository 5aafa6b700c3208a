//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - warm: prefetch every image of a catalog
//! - promote: fetch a few images urgently
//! - status: show the ledger
//! - forget: clear one image from the ledger and cache
//! - purge: drop stale cache namespaces

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Vitrine - product image cache warmer for storefront catalogs
#[derive(Parser, Debug)]
#[command(name = "vitrine")]
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
    /// Download every image of a catalog into the cache, then retry failures
    Warm {
        /// Catalog file: JSON product rows or one URL per line
        catalog: PathBuf,

        /// Skip the retry pass
        #[arg(long)]
        no_retry: bool,
    },

    /// Fetch the given images ahead of everything else
    Promote {
        /// Image URLs
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Show cached and failed images
    Status {
        /// List every failed image with its attempt count
        #[arg(short, long)]
        detailed: bool,
    },

    /// Clear an image from the ledger so it is fetched again
    Forget {
        /// Image URL
        url: String,

        /// Keep the cached payload
        #[arg(long)]
        keep_cache: bool,
    },

    /// Remove cache namespaces left by older versions
    Purge,
}
