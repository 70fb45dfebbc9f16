//! # Archive Entries
//!
//! [`ArchiveEntry`] is the in-memory model of one archive member. Entries are
//! created either by decoding a header record (see [`header`]) or by inspecting
//! a live filesystem path with [`ArchiveEntry::from_path`].
//!
//! An entry keeps the raw header it was decoded from. Every setter that touches
//! a field stored in the header drops that cached record, so a stale header is
//! never written back; [`ArchiveEntry::update_header`] renders a fresh one.

pub mod header;

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ArchiverError, Result};
use crate::fsx::{FileKind, Filesystem};
use crate::owner::Owner;
use header::HeaderBlock;

/// The seven kinds of members a ustar archive can hold.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    HardLink,
    SymLink,
    CharDevice,
    BlockDevice,
    Directory,
    Fifo,
}

impl EntryKind {
    /// The type flag byte written at offset 156.
    pub fn flag(self) -> u8 {
        match self {
            EntryKind::File => b'0',
            EntryKind::HardLink => b'1',
            EntryKind::SymLink => b'2',
            EntryKind::CharDevice => b'3',
            EntryKind::BlockDevice => b'4',
            EntryKind::Directory => b'5',
            EntryKind::Fifo => b'6',
        }
    }

    /// Maps a type flag to a kind. A NUL flag is a regular file in pre-POSIX archives.
    pub fn from_flag(flag: u8) -> Option<Self> {
        match flag {
            b'0' | 0 => Some(EntryKind::File),
            b'1' => Some(EntryKind::HardLink),
            b'2' => Some(EntryKind::SymLink),
            b'3' => Some(EntryKind::CharDevice),
            b'4' => Some(EntryKind::BlockDevice),
            b'5' => Some(EntryKind::Directory),
            b'6' => Some(EntryKind::Fifo),
            _ => None,
        }
    }

    pub fn has_payload(self) -> bool {
        self == EntryKind::File
    }
}

impl From<FileKind> for EntryKind {
    fn from(kind: FileKind) -> Self {
        match kind {
            FileKind::Regular => EntryKind::File,
            FileKind::Symlink => EntryKind::SymLink,
            FileKind::CharDevice => EntryKind::CharDevice,
            FileKind::BlockDevice => EntryKind::BlockDevice,
            FileKind::Directory => EntryKind::Directory,
            FileKind::Fifo => EntryKind::Fifo,
        }
    }
}

/// Strips every leading `./` and `/` from an entry name.
///
/// Example: `"/./usr/bin"` becomes `"usr/bin"`. A name that would become empty is kept.
pub fn normalize_name(name: &str) -> &str {
    let mut rest = name;
    loop {
        let next = if let Some(r) = rest.strip_prefix("./") {
            r
        } else if let Some(r) = rest.strip_prefix('/') {
            r
        } else {
            break;
        };
        if next.is_empty() {
            break;
        }
        rest = next;
    }
    rest
}

/// One member of an archive.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ArchiveEntry {
    name: String,
    kind: EntryKind,
    permissions: u32,
    modified: DateTime<Utc>,
    size: u64,
    /// Payload position inside the backing archive. Only set for loaded or built files.
    offset: Option<u64>,
    owner: Owner,
    link_target: String,
    dev_major: u32,
    dev_minor: u32,
    prefix: String,
    #[serde(skip)]
    header: Option<Box<HeaderBlock>>,
    /// Filesystem path a freshly added entry reads its payload from.
    #[serde(skip)]
    source_path: Option<PathBuf>,
}

impl ArchiveEntry {
    /// Creates an entry with empty metadata and no cached header.
    pub fn new(name: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            kind,
            permissions: 0,
            modified: Utc::now(),
            size: 0,
            offset: None,
            owner: Owner::default(),
            link_target: String::new(),
            dev_major: 0,
            dev_minor: 0,
            prefix: String::new(),
            header: None,
            source_path: None,
        }
    }

    /// Decodes a 512-byte header record.
    pub fn from_header(block: &HeaderBlock) -> Result<Self> {
        header::decode(block)
    }

    /// Builds an entry from the metadata of a live filesystem object.
    ///
    /// The object itself is not followed if it is a symbolic link. The entry is
    /// named after `path` and has no cached header.
    pub fn from_path<F: Filesystem + ?Sized>(fs: &F, path: &Path) -> Result<Self> {
        let stat = fs.stat(path).map_err(|e| ArchiverError::io(path, e))?;
        let kind = match stat.kind {
            Some(kind) => EntryKind::from(kind),
            None => return Err(ArchiverError::UnknownType { path: path.to_path_buf() }),
        };

        let mut entry = ArchiveEntry::new(path.to_string_lossy().into_owned(), kind);
        entry.permissions = stat.mode & 0o7777;
        entry.modified = Utc.timestamp_opt(stat.mtime, 0).single().unwrap_or_else(Utc::now);
        entry.owner = Owner::new(
            stat.uid,
            fs.lookup_user_name(stat.uid).unwrap_or_default(),
            stat.gid,
            fs.lookup_group_name(stat.gid).unwrap_or_default(),
        );

        match kind {
            EntryKind::File => {
                entry.size = stat.size;
                entry.source_path = Some(path.to_path_buf());
            }
            EntryKind::SymLink => {
                entry.link_target = fs
                    .read_link(path)
                    .map_err(|e| ArchiverError::io(path, e))?
                    .to_string_lossy()
                    .into_owned();
            }
            EntryKind::CharDevice | EntryKind::BlockDevice => {
                entry.dev_major = stat.dev_major;
                entry.dev_minor = stat.dev_minor;
            }
            EntryKind::HardLink | EntryKind::Directory | EntryKind::Fifo => {}
        }
        Ok(entry)
    }

    /// Renders the header record from the current fields and caches it.
    ///
    /// Fails if the size is larger than [`header::MAX_SIZE`].
    pub fn update_header(&mut self) -> Result<()> {
        self.header = Some(Box::new(header::encode(self)?));
        Ok(())
    }

    /// The cached header record, if one is current.
    pub fn header(&self) -> Option<&HeaderBlock> {
        self.header.as_deref()
    }

    pub(crate) fn set_header(&mut self, block: HeaderBlock) {
        self.header = Some(Box::new(block));
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.header = None;
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: EntryKind) {
        self.kind = kind;
        self.header = None;
    }

    /// Permission bits as stored in the mode field.
    pub fn permissions(&self) -> u32 {
        self.permissions
    }

    pub fn set_permissions(&mut self, permissions: u32) {
        self.permissions = permissions;
        self.header = None;
    }

    pub fn modified(&self) -> DateTime<Utc> {
        self.modified
    }

    pub fn set_modified(&mut self, modified: DateTime<Utc>) {
        self.modified = modified;
        self.header = None;
    }

    /// Payload length in bytes. Zero for everything but regular files.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn set_size(&mut self, size: u64) {
        self.size = size;
        self.header = None;
    }

    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    pub fn set_offset(&mut self, offset: Option<u64>) {
        self.offset = offset;
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub fn set_owner(&mut self, owner: Owner) {
        self.owner = owner;
        self.header = None;
    }

    pub fn link_target(&self) -> &str {
        &self.link_target
    }

    pub fn set_link_target(&mut self, target: impl Into<String>) {
        self.link_target = target.into();
        self.header = None;
    }

    pub fn dev_major(&self) -> u32 {
        self.dev_major
    }

    pub fn set_dev_major(&mut self, major: u32) {
        self.dev_major = major;
        self.header = None;
    }

    pub fn dev_minor(&self) -> u32 {
        self.dev_minor
    }

    pub fn set_dev_minor(&mut self, minor: u32) {
        self.dev_minor = minor;
        self.header = None;
    }

    /// The decoded prefix field. It is not written back when a header is rendered.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn set_prefix(&mut self, prefix: impl Into<String>) {
        self.prefix = prefix.into();
        self.header = None;
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("./a/b"), "a/b");
        assert_eq!(normalize_name("/tmp/x"), "tmp/x");
        assert_eq!(normalize_name("/././/x"), "x");
        assert_eq!(normalize_name("a/./b"), "a/./b");
        assert_eq!(normalize_name("./"), "./");
        assert_eq!(normalize_name("/"), "/");
        assert_eq!(normalize_name("..hidden"), "..hidden");
    }

    #[test]
    fn test_flag_mapping_is_total() {
        for kind in [
            EntryKind::File,
            EntryKind::HardLink,
            EntryKind::SymLink,
            EntryKind::CharDevice,
            EntryKind::BlockDevice,
            EntryKind::Directory,
            EntryKind::Fifo,
        ] {
            assert_eq!(EntryKind::from_flag(kind.flag()), Some(kind));
        }
        assert_eq!(EntryKind::from_flag(b'7'), None);
        assert_eq!(EntryKind::from_flag(b'L'), None);
    }

    #[test]
    fn test_setters_invalidate_cached_header() {
        let mut entry = ArchiveEntry::new("a.txt", EntryKind::File);
        entry.update_header().unwrap();
        assert!(entry.header().is_some());

        entry.set_offset(Some(512));
        assert!(entry.header().is_some(), "offset is not part of the header");

        entry.set_permissions(0o600);
        assert!(entry.header().is_none());

        entry.update_header().unwrap();
        entry.set_name("b.txt");
        assert!(entry.header().is_none());
    }

    #[test]
    fn test_update_header_reflects_mutation() {
        let mut entry = ArchiveEntry::new("a.txt", EntryKind::File);
        entry.set_size(3);
        entry.update_header().unwrap();
        let first = *entry.header().unwrap();

        entry.set_size(4);
        entry.update_header().unwrap();
        let second = *entry.header().unwrap();
        assert_ne!(first[124..136], second[124..136]);
    }

    #[cfg(unix)]
    #[test]
    fn test_from_path_regular_file() {
        use crate::fsx::HostFs;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ten.bin");
        std::fs::write(&path, b"0123456789").unwrap();
        crate::fsx::set_unix_permissions(&path, 0o640).unwrap();

        let entry = ArchiveEntry::from_path(&HostFs, &path).unwrap();
        assert_eq!(entry.kind(), EntryKind::File);
        assert_eq!(entry.size(), 10);
        assert_eq!(entry.permissions(), 0o640);
        assert_eq!(entry.name(), path.to_string_lossy());
        assert_eq!(entry.source_path(), Some(path.as_path()));
        assert!(entry.header().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_from_path_symlink_and_directory() {
        use crate::fsx::HostFs;

        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink("target.txt", &link).unwrap();

        let entry = ArchiveEntry::from_path(&HostFs, &link).unwrap();
        assert_eq!(entry.kind(), EntryKind::SymLink);
        assert_eq!(entry.link_target(), "target.txt");
        assert_eq!(entry.size(), 0);

        let entry = ArchiveEntry::from_path(&HostFs, dir.path()).unwrap();
        assert_eq!(entry.kind(), EntryKind::Directory);
        assert_eq!(entry.size(), 0);
        assert_eq!(entry.link_target(), "");
    }

    #[test]
    fn test_from_path_missing() {
        use crate::fsx::HostFs;

        let dir = tempfile::tempdir().unwrap();
        let err = ArchiveEntry::from_path(&HostFs, &dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, ArchiverError::NotFound { .. }), "{err}");
    }
}
