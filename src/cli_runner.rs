//! Command dispatch for the `tarchive` binary.

use std::io::{self, Write};

use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::cli::{self, Commands, LOG_ENV};
use crate::{Archive, BuildOrder, EntryKind, ExtractOptions};

/// Installs the stderr log subscriber. The filter comes from `TARCHIVE_LOG`, default `warn`.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

/// Public entry for running CLI logic.
pub fn run_cli_app() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let command = cli::run()?;
    debug!(?command, "parsed command line");

    match command {
        Commands::Create { inputs, output, recursive, sort } => {
            let mut archive = Archive::new();
            if sort {
                archive.set_build_order(BuildOrder::Sorted);
            }
            for input in &inputs {
                archive.add(input, recursive)?;
            }
            archive.save(Some(output.as_path()))?;
        }
        Commands::Extract { archive, indexes, output, permissions, owner } => {
            let archive = Archive::open(&archive)?;
            let target = match output {
                Some(dir) => dir,
                None => std::env::current_dir()?,
            };
            if indexes.is_empty() {
                archive.extract_all(&target, ExtractOptions { set_permissions: permissions, set_owner: owner })?;
            } else {
                for index in indexes {
                    archive.extract(index, &target, permissions, owner)?;
                }
            }
        }
        Commands::List { archive, json } => {
            let archive = Archive::open(&archive)?;
            let stdout = io::stdout();
            let mut out = stdout.lock();
            if json {
                serde_json::to_writer_pretty(&mut out, archive.entries())?;
                writeln!(out)?;
            } else {
                for (index, entry) in archive.entries().iter().enumerate() {
                    let mut line = format!(
                        "{:>4} {} {:04o} {:>8}/{:<8} {:>10} {} {}",
                        index,
                        kind_char(entry.kind()),
                        entry.permissions() & 0o7777,
                        display_id(entry.owner().user_name(), entry.owner().user_id()),
                        display_id(entry.owner().group_name(), entry.owner().group_id()),
                        entry.size(),
                        entry.modified().format("%Y-%m-%d %H:%M"),
                        entry.name(),
                    );
                    if matches!(entry.kind(), EntryKind::HardLink | EntryKind::SymLink) {
                        line.push_str(" -> ");
                        line.push_str(entry.link_target());
                    }
                    writeln!(out, "{}", line)?;
                }
            }
        }
        Commands::Remove { archive: path, mut indexes } => {
            let mut archive = Archive::open(&path)?;
            indexes.sort_unstable();
            indexes.dedup();
            for index in indexes.into_iter().rev() {
                let removed = archive.remove(index)?;
                debug!(entry = removed.name(), index, "removed");
            }
            archive.save(None)?;
        }
    }

    Ok(())
}

fn kind_char(kind: EntryKind) -> char {
    match kind {
        EntryKind::File => '-',
        EntryKind::HardLink => 'h',
        EntryKind::SymLink => 'l',
        EntryKind::CharDevice => 'c',
        EntryKind::BlockDevice => 'b',
        EntryKind::Directory => 'd',
        EntryKind::Fifo => 'p',
    }
}

fn display_id(name: &str, id: u32) -> String {
    if name.is_empty() {
        id.to_string()
    } else {
        name.to_string()
    }
}
