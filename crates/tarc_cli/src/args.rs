use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[clap(name = "tarc")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Read the configuration from this file instead of the one in the
    /// user's config folder.
    #[clap(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Print debug logs
    #[clap(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Reconcile a directory against the torrents of the endpoints
    Scan(ScanArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct ScanArgs {
    /// The directory to scan, where the torrent data is expected
    #[clap(short, long)]
    pub directory: PathBuf,

    /// A directory of .torrent files, can be repeated. Added to the
    /// endpoints of the config file.
    #[clap(short, long = "torrents")]
    pub torrents: Vec<PathBuf>,

    /// How many pieces are hashed at the same time
    #[clap(short, long)]
    pub workers: Option<usize>,

    /// Ignore files and folders starting with a dot
    #[clap(long)]
    pub skip_hidden: bool,

    /// Print the report as JSON
    #[clap(long)]
    pub json: bool,
}
