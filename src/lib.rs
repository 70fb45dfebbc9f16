//! # tarchive Core Library
//!
//! This crate reads and writes POSIX ustar archives. It is used by the `tarchive`
//! command-line application, but its public API can also be used to enumerate,
//! extract and build `.tar` files programmatically.
//!
//! ## Key Modules
//!
//! - [`archive`]: Loading, extracting, adding, removing and serializing entries.
//! - [`entry`]: The per-member data model and the 512-byte header codec.
//! - [`owner`]: User and group ownership of an entry.
//! - [`fsx`]: The host filesystem operations an archive depends on.
//!
//! ## Examples
//!
//! ```no_run
//! use tarchive::Archive;
//!
//! let mut archive = Archive::new();
//! archive.add("docs", true)?;
//! archive.save(Some("docs.tar".as_ref()))?;
//!
//! let loaded = Archive::open("docs.tar")?;
//! loaded.extract_all("restore", Default::default())?;
//! # Ok::<(), tarchive::ArchiverError>(())
//! ```

#[cfg(not(unix))]
compile_error!("tarchive needs a Unix host for links, device nodes and FIFOs");

pub mod archive;
pub mod cli;
pub mod cli_runner;
pub mod entry;
pub mod error;
pub mod fsx;
pub mod owner;

pub use archive::{Archive, BuildOrder, ExtractOptions};
pub use entry::{ArchiveEntry, EntryKind};
pub use error::ArchiverError;
pub use owner::Owner;
