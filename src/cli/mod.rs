use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Environment variable holding the log filter, e.g. `TARCHIVE_LOG=debug`.
pub const LOG_ENV: &str = "TARCHIVE_LOG";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Build a ustar archive from files, directories, links, devices and FIFOs.
    #[command(alias = "c")]
    Create {
        /// Paths to archive. Symbolic links are stored, not followed.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Where to write the archive (e.g., backup.tar).
        #[arg(short, long)]
        output: PathBuf,

        /// Add directories without their contents.
        #[arg(long = "no-recursive", action = clap::ArgAction::SetFalse, default_value_t = true)]
        recursive: bool,

        /// Write entries sorted by their header instead of in the order they were added.
        #[arg(long)]
        sort: bool,
    },

    /// Extract entries from an archive.
    #[command(alias = "x")]
    Extract {
        /// Archive to read from.
        #[arg(required = true)]
        archive: PathBuf,

        /// Indexes of the entries to extract, as printed by `list`. If empty, all entries are extracted.
        indexes: Vec<usize>,

        /// The directory where entries will be extracted. Defaults to the current directory.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Do not apply the stored permission bits.
        #[arg(long = "no-permissions", action = clap::ArgAction::SetFalse, default_value_t = true)]
        permissions: bool,

        /// Apply the stored uid and gid (usually requires root).
        #[arg(long)]
        owner: bool,
    },

    /// Print one line per entry: index, type, mode, owner, size, mtime, name.
    #[command(alias = "l")]
    List {
        /// Archive to inspect.
        #[arg(required = true)]
        archive: PathBuf,

        /// Print the entries as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Remove entries from an archive and rewrite it in place.
    #[command(alias = "rm")]
    Remove {
        /// The archive file to modify.
        #[arg(required = true)]
        archive: PathBuf,

        /// Indexes of the entries to remove, as printed by `list`.
        #[arg(required = true)]
        indexes: Vec<usize>,
    },
}

/// Parses the command line into the subcommand to run.
pub fn run() -> Result<Commands, Box<dyn std::error::Error>> {
    let args = Args::parse();
    Ok(args.command)
}
