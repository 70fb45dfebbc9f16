//! Cross-checks against the `tar` crate: archives built here must read back
//! there, and archives written there must load and extract here.

use std::fs;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;

use tarchive::{Archive, EntryKind, ExtractOptions};
use tempfile::tempdir;

#[test]
fn test_built_archive_reads_with_tar_crate() -> Result<(), Box<dyn std::error::Error>> {
    let source_dir = tempdir()?;
    fs::write(source_dir.path().join("alpha.txt"), b"alpha contents")?;
    fs::write(source_dir.path().join("beta.bin"), vec![42u8; 700])?;
    std::os::unix::fs::symlink("alpha.txt", source_dir.path().join("gamma"))?;

    let mut archive = Archive::new();
    archive.add(source_dir.path(), true)?;
    let image = archive.build()?;

    let mut reader = tar::Archive::new(image.as_slice());
    let mut seen = Vec::new();
    for entry in reader.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().into_owned();
        let kind = entry.header().entry_type();
        if path.ends_with("alpha.txt") {
            let mut body = String::new();
            entry.read_to_string(&mut body)?;
            assert_eq!(body, "alpha contents");
            assert_eq!(entry.header().mode()? & 0o777, fs::metadata(source_dir.path().join("alpha.txt"))?.permissions().mode() & 0o777);
        }
        if path.ends_with("beta.bin") {
            assert_eq!(entry.header().size()?, 700);
        }
        if path.ends_with("gamma") {
            assert!(kind.is_symlink());
            assert_eq!(entry.link_name()?.unwrap().to_string_lossy(), "alpha.txt");
        }
        assert!(!path.starts_with('/'));
        seen.push(path);
    }
    assert_eq!(seen.len(), 4);
    Ok(())
}

#[test]
fn test_tar_crate_archive_loads_and_extracts() -> Result<(), Box<dyn std::error::Error>> {
    let work = tempdir()?;
    let tar_path = work.path().join("foreign.tar");

    {
        let file = fs::File::create(&tar_path)?;
        let mut builder = tar::Builder::new(file);

        let mut dir = tar::Header::new_ustar();
        dir.set_path("pkg")?;
        dir.set_entry_type(tar::EntryType::Directory);
        dir.set_mode(0o755);
        dir.set_size(0);
        dir.set_mtime(1_600_000_000);
        dir.set_cksum();
        builder.append(&dir, std::io::empty())?;

        let body = b"payload from another writer";
        let mut file = tar::Header::new_ustar();
        file.set_path("pkg/readme.txt")?;
        file.set_mode(0o644);
        file.set_size(body.len() as u64);
        file.set_mtime(1_600_000_000);
        file.set_cksum();
        builder.append(&file, &body[..])?;

        builder.finish()?;
    }

    let archive = Archive::open(&tar_path)?;
    assert_eq!(archive.len(), 2);
    assert_eq!(archive.entry(0)?.kind(), EntryKind::Directory);
    assert_eq!(archive.entry(1)?.name(), "pkg/readme.txt");
    assert_eq!(archive.entry(1)?.offset(), Some(1024));
    assert_eq!(archive.entry(1)?.modified().timestamp(), 1_600_000_000);

    let target = tempdir()?;
    archive.extract_all(target.path(), ExtractOptions::default())?;
    assert!(target.path().join("pkg").is_dir());
    assert_eq!(fs::read(target.path().join("pkg/readme.txt"))?, b"payload from another writer");
    Ok(())
}
