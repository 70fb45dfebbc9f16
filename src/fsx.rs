//! Host filesystem access.
//!
//! Plain file I/O goes straight through `std::fs`, which is re-exported here so
//! the rest of the crate can `use crate::fsx as fs`. Everything an archive needs
//! beyond reading and writing bytes (classifying objects, links, device nodes,
//! FIFOs, permissions, ownership, user and group names) is behind the
//! [`Filesystem`] trait. [`HostFs`] implements it with libc calls.

use std::ffi::{CStr, CString};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{DirBuilderExt, FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

pub use std::fs::*;

/// File type bits of a character device node.
pub const S_IFCHR: u32 = 0o020000;
/// File type bits of a block device node.
pub const S_IFBLK: u32 = 0o060000;

/// The filesystem object kinds that can be archived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Char,
    Block,
}

impl DeviceKind {
    /// The `S_IF*` bits combined with the permission bits when creating the node.
    pub fn mode_bits(self) -> u32 {
        match self {
            DeviceKind::Char => S_IFCHR,
            DeviceKind::Block => S_IFBLK,
        }
    }
}

/// Metadata of a filesystem object, as seen without following symbolic links.
#[derive(Debug, Clone, Default)]
pub struct FileStat {
    /// `None` for objects that cannot be archived, such as sockets.
    pub kind: Option<FileKind>,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub mtime: i64,
    pub dev_major: u32,
    pub dev_minor: u32,
}

/// Operations on the host an archive relies on for adding and extracting entries.
pub trait Filesystem {
    fn stat(&self, path: &Path) -> io::Result<FileStat>;
    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;
    /// Whether `path` exists, following symbolic links.
    fn exists(&self, path: &Path) -> bool;
    /// Whether `path` is a directory, following symbolic links.
    fn is_dir(&self, path: &Path) -> bool;
    fn is_writable(&self, path: &Path) -> bool;
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
    fn create_dir(&self, path: &Path, mode: u32) -> io::Result<()>;
    fn create_hard_link(&self, original: &Path, link: &Path) -> io::Result<()>;
    fn create_symlink(&self, target: &Path, link: &Path) -> io::Result<()>;
    fn create_device_node(&self, path: &Path, kind: DeviceKind, mode: u32, major: u32, minor: u32) -> io::Result<()>;
    fn create_fifo(&self, path: &Path, mode: u32) -> io::Result<()>;
    fn set_permissions(&self, path: &Path, mode: u32) -> io::Result<()>;
    /// Changes ownership without following a symbolic link at `path`.
    fn set_owner(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()>;
    fn lookup_user_name(&self, uid: u32) -> Option<String>;
    fn lookup_group_name(&self, gid: u32) -> Option<String>;
}

/// The local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostFs;

/// Set POSIX permission bits.
pub fn set_unix_permissions(path: &Path, mode: u32) -> io::Result<()> {
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

fn c_path(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"))
}

fn check(rc: libc::c_int) -> io::Result<()> {
    if rc == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[allow(unused_unsafe)]
fn split_dev(rdev: u64) -> (u32, u32) {
    let dev = rdev as libc::dev_t;
    unsafe { (libc::major(dev) as u32, libc::minor(dev) as u32) }
}

#[allow(unused_unsafe)]
fn make_dev(major: u32, minor: u32) -> libc::dev_t {
    unsafe { libc::makedev(major as _, minor as _) }
}

const NAME_BUF_LEN: usize = 4096;

impl Filesystem for HostFs {
    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let meta = std::fs::symlink_metadata(path)?;
        let ft = meta.file_type();
        let kind = if ft.is_file() {
            Some(FileKind::Regular)
        } else if ft.is_dir() {
            Some(FileKind::Directory)
        } else if ft.is_symlink() {
            Some(FileKind::Symlink)
        } else if ft.is_char_device() {
            Some(FileKind::CharDevice)
        } else if ft.is_block_device() {
            Some(FileKind::BlockDevice)
        } else if ft.is_fifo() {
            Some(FileKind::Fifo)
        } else {
            None
        };
        let (dev_major, dev_minor) = match kind {
            Some(FileKind::CharDevice) | Some(FileKind::BlockDevice) => split_dev(meta.rdev()),
            _ => (0, 0),
        };
        Ok(FileStat {
            kind,
            mode: meta.mode(),
            uid: meta.uid(),
            gid: meta.gid(),
            size: meta.size(),
            mtime: meta.mtime(),
            dev_major,
            dev_minor,
        })
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        std::fs::read_link(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn is_writable(&self, path: &Path) -> bool {
        match c_path(path) {
            Ok(cpath) => unsafe { libc::access(cpath.as_ptr(), libc::W_OK) == 0 },
            Err(_) => false,
        }
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn create_dir(&self, path: &Path, mode: u32) -> io::Result<()> {
        std::fs::DirBuilder::new().mode(mode).create(path)
    }

    fn create_hard_link(&self, original: &Path, link: &Path) -> io::Result<()> {
        std::fs::hard_link(original, link)
    }

    fn create_symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        std::os::unix::fs::symlink(target, link)
    }

    fn create_device_node(&self, path: &Path, kind: DeviceKind, mode: u32, major: u32, minor: u32) -> io::Result<()> {
        let cpath = c_path(path)?;
        let mode = kind.mode_bits() | (mode & 0o7777);
        check(unsafe { libc::mknod(cpath.as_ptr(), mode as libc::mode_t, make_dev(major, minor)) })
    }

    fn create_fifo(&self, path: &Path, mode: u32) -> io::Result<()> {
        let cpath = c_path(path)?;
        check(unsafe { libc::mkfifo(cpath.as_ptr(), (mode & 0o7777) as libc::mode_t) })
    }

    fn set_permissions(&self, path: &Path, mode: u32) -> io::Result<()> {
        set_unix_permissions(path, mode)
    }

    fn set_owner(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        std::os::unix::fs::lchown(path, Some(uid), Some(gid))
    }

    fn lookup_user_name(&self, uid: u32) -> Option<String> {
        let mut buf = vec![0 as libc::c_char; NAME_BUF_LEN];
        let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::passwd = std::ptr::null_mut();
        let rc = unsafe { libc::getpwuid_r(uid, &mut pwd, buf.as_mut_ptr(), buf.len(), &mut result) };
        if rc != 0 || result.is_null() {
            return None;
        }
        let name = unsafe { CStr::from_ptr(pwd.pw_name) };
        Some(name.to_string_lossy().into_owned())
    }

    fn lookup_group_name(&self, gid: u32) -> Option<String> {
        let mut buf = vec![0 as libc::c_char; NAME_BUF_LEN];
        let mut grp: libc::group = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::group = std::ptr::null_mut();
        let rc = unsafe { libc::getgrgid_r(gid, &mut grp, buf.as_mut_ptr(), buf.len(), &mut result) };
        if rc != 0 || result.is_null() {
            return None;
        }
        let name = unsafe { CStr::from_ptr(grp.gr_name) };
        Some(name.to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_stat_classifies_kinds() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"abc").unwrap();
        let fifo = dir.path().join("p");
        HostFs.create_fifo(&fifo, 0o600).unwrap();

        let st = HostFs.stat(&file).unwrap();
        assert_eq!(st.kind, Some(FileKind::Regular));
        assert_eq!(st.size, 3);
        assert_eq!(HostFs.stat(dir.path()).unwrap().kind, Some(FileKind::Directory));
        assert_eq!(HostFs.stat(&fifo).unwrap().kind, Some(FileKind::Fifo));
    }

    #[test]
    fn test_stat_socket_is_unclassified() {
        let dir = tempdir().unwrap();
        let sock = dir.path().join("s");
        let _listener = std::os::unix::net::UnixListener::bind(&sock).unwrap();
        assert_eq!(HostFs.stat(&sock).unwrap().kind, None);
    }

    #[test]
    fn test_device_numbers_roundtrip() {
        let dev = make_dev(8, 17);
        assert_eq!(split_dev(dev as u64), (8, 17));
    }

    #[test]
    fn test_root_names_resolve() {
        assert_eq!(HostFs.lookup_user_name(0).as_deref(), Some("root"));
    }
}
