//! # Archive
//!
//! [`Archive`] holds an ordered list of [`ArchiveEntry`] values and moves them
//! between three places: a ustar file on disk (`load` / `save`), the live
//! filesystem (`add` / `extract`) and an in-memory byte image (`build`).
//!
//! Payloads are never kept with the entries. A loaded file entry remembers
//! where its data starts inside the backing archive and the archive is reopened
//! for every read. A freshly added entry reads from the path it was added from.
//! `build` rewrites the offsets to point into the image it just produced, and
//! that image serves payload reads until `save` puts it on disk.

use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::entry::header::{self, HeaderBlock, BLOCK_SIZE};
use crate::entry::{normalize_name, ArchiveEntry, EntryKind};
use crate::error::{ArchiverError, Result};
use crate::fsx::{self as fs, DeviceKind, Filesystem, HostFs};

/// Order in which `build` writes the entries.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum BuildOrder {
    /// Keep the order of the entry list.
    #[default]
    Insertion,
    /// Stable sort by the encoded header bytes, which orders by name first.
    Sorted,
}

/// Flags for [`Archive::extract_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    pub set_permissions: bool,
    pub set_owner: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self { set_permissions: true, set_owner: false }
    }
}

/// A ustar archive.
pub struct Archive<F: Filesystem = HostFs> {
    /// The file this archive was last loaded from or saved to.
    path: Option<PathBuf>,
    /// Image produced by the last `build` that has not been saved yet.
    staged: Option<Vec<u8>>,
    entries: Vec<ArchiveEntry>,
    order: BuildOrder,
    fs: F,
}

impl Archive<HostFs> {
    /// Creates an empty archive working on the local filesystem.
    pub fn new() -> Self {
        Self::with_filesystem(HostFs)
    }

    /// Loads the archive stored at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut archive = Self::new();
        archive.load(path)?;
        Ok(archive)
    }
}

impl Default for Archive<HostFs> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Filesystem> Archive<F> {
    pub fn with_filesystem(fs: F) -> Self {
        Self {
            path: None,
            staged: None,
            entries: Vec::new(),
            order: BuildOrder::default(),
            fs,
        }
    }

    pub fn filesystem(&self) -> &F {
        &self.fs
    }

    pub fn build_order(&self) -> BuildOrder {
        self.order
    }

    pub fn set_build_order(&mut self, order: BuildOrder) {
        self.order = order;
    }

    /// The backing archive file, once one was loaded or saved.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, index: usize) -> Result<&ArchiveEntry> {
        let len = self.entries.len();
        self.entries.get(index).ok_or(ArchiverError::Index { index, len })
    }

    /// Mutable access to an entry. Changing a header field drops its cached header.
    pub fn entry_mut(&mut self, index: usize) -> Result<&mut ArchiveEntry> {
        let len = self.entries.len();
        self.entries.get_mut(index).ok_or(ArchiverError::Index { index, len })
    }

    /// Index of the entry named exactly `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name() == name)
    }

    pub fn has_entry(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Appends an entry built elsewhere.
    pub fn push(&mut self, entry: ArchiveEntry) {
        self.entries.push(entry);
    }

    /// Replaces the entry list with the members of the archive at `path`.
    ///
    /// Blocks without the ustar magic are skipped. The payload blocks of a file
    /// entry are stepped over by position, so file contents are never taken for
    /// headers. On error the archive is left unchanged.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = fs::File::open(path).map_err(|e| ArchiverError::io(path, e))?;
        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();
        let mut block: HeaderBlock = [0u8; BLOCK_SIZE];
        let mut position: u64 = 0;

        loop {
            let filled = read_block(&mut reader, &mut block).map_err(|e| ArchiverError::io(path, e))?;
            if filled == 0 {
                break;
            }
            if filled < BLOCK_SIZE {
                warn!(path = %path.display(), bytes = filled, "ignoring trailing partial block");
                break;
            }
            position += BLOCK_SIZE as u64;

            if !header::is_header(&block) {
                continue;
            }

            let mut entry = ArchiveEntry::from_header(&block)?;
            if entry.kind().has_payload() {
                entry.set_offset(Some(position));
                let skip = header::padded_size(entry.size());
                let skip_by = i64::try_from(skip)
                    .map_err(|_| ArchiverError::Format(format!("payload of '{}' is too large", entry.name())))?;
                reader.seek_relative(skip_by).map_err(|e| ArchiverError::io(path, e))?;
                position += skip;
            }
            debug!(entry = entry.name(), kind = ?entry.kind(), size = entry.size(), "read header");
            entries.push(entry);
        }

        info!(path = %path.display(), entries = entries.len(), "loaded archive");
        self.entries = entries;
        self.path = Some(path.to_path_buf());
        self.staged = None;
        Ok(())
    }

    /// Returns the payload of a file entry, or `None` for every other kind.
    pub fn extract_data(&self, index: usize) -> Result<Option<Vec<u8>>> {
        let entry = self.entry(index)?;
        if !entry.kind().has_payload() {
            return Ok(None);
        }
        self.read_payload(entry).map(Some)
    }

    fn read_payload(&self, entry: &ArchiveEntry) -> Result<Vec<u8>> {
        let size = usize::try_from(entry.size())
            .map_err(|_| ArchiverError::Format(format!("payload of '{}' is too large", entry.name())))?;

        match entry.offset() {
            Some(offset) => {
                if let Some(image) = &self.staged {
                    let start = usize::try_from(offset).unwrap_or(usize::MAX);
                    return start
                        .checked_add(size)
                        .and_then(|end| image.get(start..end))
                        .map(<[u8]>::to_vec)
                        .ok_or_else(|| {
                            io::Error::new(io::ErrorKind::UnexpectedEof, format!("payload of '{}' is truncated", entry.name()))
                                .into()
                        });
                }
                let path = self.path.as_deref().ok_or(ArchiverError::MissingPath)?;
                let mut file = fs::File::open(path).map_err(|e| ArchiverError::io(path, e))?;
                file.seek(SeekFrom::Start(offset)).map_err(|e| ArchiverError::io(path, e))?;
                read_exact_vec(&mut file, size, path)
            }
            None => {
                let path = entry.source_path().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(entry.name()));
                let mut file = fs::File::open(&path).map_err(|e| ArchiverError::io(&path, e))?;
                read_exact_vec(&mut file, size, &path)
            }
        }
    }

    /// Recreates entry `index` below `target_dir`.
    ///
    /// The entry name is resolved below `target_dir` and can never leave it: a
    /// name made only of `/` or `./` is `target_dir` itself, a `..` component is a
    /// [`ArchiverError::Format`] error. Hard link targets resolve the same way.
    ///
    /// Missing parent directories are created. With `set_permissions` the mode of
    /// files, hard links and directories is applied afterwards; failures there are
    /// only logged. Symbolic links are never chmodded: without `lchmod` the mode
    /// would land on the link target. With `set_owner` uid and gid are applied to
    /// files, links and directories.
    pub fn extract(&self, index: usize, target_dir: impl AsRef<Path>, set_permissions: bool, set_owner: bool) -> Result<()> {
        let entry = self.entry(index)?;
        let target_dir = target_dir.as_ref();
        let target = resolve_in(target_dir, entry.name())?;
        let parent = if target == target_dir { Some(target_dir) } else { target.parent() };
        if let Some(parent) = parent {
            self.prepare_parent(parent)?;
        }

        let mode = entry.permissions();
        let created = match entry.kind() {
            EntryKind::File => {
                let data = self.read_payload(entry)?;
                fs::write(&target, data)
            }
            EntryKind::HardLink => {
                let original = resolve_in(target_dir, entry.link_target())?;
                self.fs.create_hard_link(&original, &target)
            }
            EntryKind::SymLink => self.fs.create_symlink(Path::new(entry.link_target()), &target),
            EntryKind::CharDevice => {
                self.fs.create_device_node(&target, DeviceKind::Char, mode, entry.dev_major(), entry.dev_minor())
            }
            EntryKind::BlockDevice => {
                self.fs.create_device_node(&target, DeviceKind::Block, mode, entry.dev_major(), entry.dev_minor())
            }
            EntryKind::Directory => match self.fs.create_dir(&target, mode) {
                // already there as the parent of an earlier entry
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && self.fs.is_dir(&target) => Ok(()),
                other => other,
            },
            EntryKind::Fifo => self.fs.create_fifo(&target, mode),
        };
        created.map_err(|source| ArchiverError::Io { source, path: target.clone() })?;
        debug!(entry = entry.name(), dest = %target.display(), "extracted");

        match entry.kind() {
            EntryKind::File | EntryKind::HardLink | EntryKind::SymLink | EntryKind::Directory => {
                // no lchmod: following a symlink would change its target instead
                if set_permissions && entry.kind() != EntryKind::SymLink {
                    if let Err(err) = self.fs.set_permissions(&target, mode) {
                        warn!(dest = %target.display(), mode = %format!("{:o}", mode), %err, "failed to set permissions");
                    }
                }
                if set_owner {
                    let owner = entry.owner();
                    if let Err(err) = self.fs.set_owner(&target, owner.user_id(), owner.group_id()) {
                        warn!(dest = %target.display(), uid = owner.user_id(), gid = owner.group_id(), %err, "failed to set owner");
                    }
                }
            }
            EntryKind::CharDevice | EntryKind::BlockDevice | EntryKind::Fifo => {}
        }
        Ok(())
    }

    /// Extracts every entry in list order.
    pub fn extract_all(&self, target_dir: impl AsRef<Path>, options: ExtractOptions) -> Result<()> {
        let target_dir = target_dir.as_ref();
        for index in 0..self.entries.len() {
            self.extract(index, target_dir, options.set_permissions, options.set_owner)?;
        }
        info!(dest = %target_dir.display(), entries = self.entries.len(), "extracted archive");
        Ok(())
    }

    fn prepare_parent(&self, dir: &Path) -> Result<()> {
        if self.fs.exists(dir) {
            if !self.fs.is_dir(dir) {
                return Err(ArchiverError::NotADirectory { path: dir.to_path_buf() });
            }
            if !self.fs.is_writable(dir) {
                return Err(ArchiverError::AccessDenied { path: dir.to_path_buf() });
            }
            Ok(())
        } else {
            self.fs
                .create_dir_all(dir)
                .map_err(|source| ArchiverError::Io { source, path: dir.to_path_buf() })
        }
    }

    /// Adds the filesystem object at `path`, and with `recursive` everything below it.
    ///
    /// Paths already present under the same name are skipped together with their
    /// subtree. Symbolic links are stored as links and never followed.
    pub fn add(&mut self, path: impl AsRef<Path>, recursive: bool) -> Result<()> {
        let root = strip_trailing_slash(path.as_ref());
        let max_depth = if recursive { usize::MAX } else { 0 };
        let mut walker = WalkDir::new(&root)
            .follow_links(false)
            .follow_root_links(false)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter();

        let mut added = 0usize;
        while let Some(item) = walker.next() {
            let item = item.map_err(walk_error)?;
            let name = item.path().to_string_lossy();
            if self.has_entry(&name) {
                debug!(entry = %name, "already in archive");
                if item.file_type().is_dir() {
                    walker.skip_current_dir();
                }
                continue;
            }
            let entry = ArchiveEntry::from_path(&self.fs, item.path())?;
            self.entries.push(entry);
            added += 1;
        }
        debug!(path = %root.display(), added, "added");
        Ok(())
    }

    /// Drops entry `index`, keeping the order of the others.
    pub fn remove(&mut self, index: usize) -> Result<ArchiveEntry> {
        let len = self.entries.len();
        if index >= len {
            return Err(ArchiverError::Index { index, len });
        }
        Ok(self.entries.remove(index))
    }

    /// Serializes all entries into a ustar byte image.
    ///
    /// Entries without a cached header get their name normalized and a header
    /// rendered. File offsets are moved into the returned image, which is kept
    /// to serve payload reads until the archive is saved.
    pub fn build(&mut self) -> Result<Vec<u8>> {
        if self.order == BuildOrder::Sorted {
            for entry in &mut self.entries {
                ensure_header(entry)?;
            }
            self.entries.sort_by(|a, b| a.header().cmp(&b.header()));
        }

        let mut image = Vec::new();
        let mut offsets = Vec::with_capacity(self.entries.len());
        for index in 0..self.entries.len() {
            header::check_size(&self.entries[index])?;
            let payload = if self.entries[index].kind().has_payload() {
                Some(self.read_payload(&self.entries[index])?)
            } else {
                None
            };

            let entry = &mut self.entries[index];
            let block = ensure_header(entry)?;
            image.extend_from_slice(&block);

            match payload {
                Some(data) => {
                    offsets.push(Some(image.len() as u64));
                    let padded = header::padded_size(data.len() as u64) as usize;
                    image.extend_from_slice(&data);
                    image.resize(image.len() + (padded - data.len()), 0);
                }
                None => offsets.push(None),
            }
            debug!(entry = entry.name(), kind = ?entry.kind(), bytes = image.len(), "serialized");
        }

        for (entry, offset) in self.entries.iter_mut().zip(offsets) {
            if offset.is_some() {
                entry.set_offset(offset);
            }
        }
        self.staged = Some(image.clone());
        Ok(image)
    }

    /// Builds the archive and writes it to `path`, or to the remembered path if `None`.
    pub fn save(&mut self, path: Option<&Path>) -> Result<()> {
        let target = match path.map(Path::to_path_buf).or_else(|| self.path.clone()) {
            Some(target) => target,
            None => return Err(ArchiverError::MissingPath),
        };
        let image = self.build()?;
        fs::write(&target, &image).map_err(|e| ArchiverError::io(&target, e))?;
        info!(path = %target.display(), entries = self.entries.len(), bytes = image.len(), "saved archive");
        self.path = Some(target);
        self.staged = None;
        Ok(())
    }
}

/// Returns the cached header, rendering it first if there is none.
fn ensure_header(entry: &mut ArchiveEntry) -> Result<HeaderBlock> {
    if let Some(block) = entry.header() {
        return Ok(*block);
    }
    let name = normalize_name(entry.name()).to_string();
    entry.set_name(name);
    entry.update_header()?;
    Ok(*entry.header().unwrap_or(&[0u8; BLOCK_SIZE]))
}

/// Joins an entry name onto `base`, keeping only plain path components.
fn resolve_in(base: &Path, name: &str) -> Result<PathBuf> {
    let mut path = base.to_path_buf();
    for component in Path::new(normalize_name(name)).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(ArchiverError::Format(format!("entry name '{}' points outside the target directory", name)));
            }
        }
    }
    Ok(path)
}

/// Fills `block` from `reader`. Returns the number of bytes read, short only at end of input.
fn read_block<R: Read>(reader: &mut R, block: &mut HeaderBlock) -> io::Result<usize> {
    let mut filled = 0;
    while filled < block.len() {
        match reader.read(&mut block[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn read_exact_vec<R: Read>(reader: &mut R, size: usize, path: &Path) -> Result<Vec<u8>> {
    let mut data = vec![0u8; size];
    reader.read_exact(&mut data).map_err(|e| ArchiverError::io(path, e))?;
    Ok(data)
}

fn strip_trailing_slash(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    match text.strip_suffix('/') {
        Some(stripped) if !stripped.is_empty() => PathBuf::from(stripped),
        _ => path.to_path_buf(),
    }
}

fn walk_error(err: walkdir::Error) -> ArchiverError {
    let path = err.path().map(Path::to_path_buf).unwrap_or_default();
    let message = err.to_string();
    match err.into_io_error() {
        Some(source) => ArchiverError::io(path, source),
        None => ArchiverError::Io { source: io::Error::new(io::ErrorKind::Other, message), path },
    }
}
