//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

/// Mirror remote collections into local directories.
///
/// Files are written atomically, skipped when their size already matches the
/// server, and the directory is checked for entries the manifest does not
/// name.
#[derive(Parser, Debug)]
#[command(name = "mirror")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download a manifest into a directory and reconcile it
    Sync(SyncArgs),

    /// Compare a local file's size with the server's Content-Length
    Check {
        /// Remote URL
        url: String,
        /// Local file
        path: PathBuf,
    },

    /// Print SHA-256 digests of local files
    Digest {
        /// Files to digest
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

#[derive(ClapArgs, Debug)]
pub struct SyncArgs {
    /// JSON manifest: an array of {"url", "filename"} objects
    #[arg(short, long, value_name = "FILE")]
    pub manifest: PathBuf,

    /// Target directory
    #[arg(short, long, value_name = "DIR")]
    pub dir: PathBuf,

    /// Rename unexpected entries by appending this extension
    #[arg(long, value_name = "EXT")]
    pub quarantine: Option<String>,

    /// Always download, skipping the size check
    #[arg(long)]
    pub no_verify: bool,

    /// Report a digest for every file present after the sync
    #[arg(long)]
    pub digests: bool,

    /// Maximum concurrent downloads (1-32)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=32))]
    pub concurrency: Option<u8>,
}
