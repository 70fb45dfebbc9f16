//! # Ustar Header Record
//!
//! Encoding and decoding of the fixed-layout 512-byte header that precedes every
//! member of a ustar archive. All numeric fields are octal text. The layout is:
//!
//! | field      | offset | length |
//! |------------|--------|--------|
//! | name       | 0      | 100    |
//! | mode       | 100    | 8      |
//! | uid        | 108    | 8      |
//! | gid        | 116    | 8      |
//! | size       | 124    | 12     |
//! | mtime      | 136    | 12     |
//! | checksum   | 148    | 8      |
//! | type flag  | 156    | 1      |
//! | link name  | 157    | 100    |
//! | magic      | 257    | 8      |
//! | user name  | 265    | 32     |
//! | group name | 297    | 32     |
//! | dev major  | 329    | 8      |
//! | dev minor  | 337    | 8      |
//! | prefix     | 345    | 155    |
//!
//! The checksum covers its own field, so it is computed with that field filled
//! with spaces and written afterwards.

use chrono::{DateTime, TimeZone, Utc};
use tracing::warn;

use super::{normalize_name, ArchiveEntry, EntryKind};
use crate::error::{ArchiverError, Result};
use crate::owner::Owner;

/// Size of a header record and of the blocks payloads are padded to.
pub const BLOCK_SIZE: usize = 512;

/// A raw header record.
pub type HeaderBlock = [u8; BLOCK_SIZE];

/// Bytes at offset 257 that identify a block as a header.
pub const MAGIC: &[u8; 5] = b"ustar";

/// Magic plus version as written into new headers.
const MAGIC_VERSION: &[u8; 8] = b"ustar  \0";

#[derive(Debug, Clone, Copy)]
struct Field {
    offset: usize,
    len: usize,
}

impl Field {
    const fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.len
    }
}

const NAME: Field = Field::new(0, 100);
const MODE: Field = Field::new(100, 8);
const UID: Field = Field::new(108, 8);
const GID: Field = Field::new(116, 8);
const SIZE: Field = Field::new(124, 12);
const MTIME: Field = Field::new(136, 12);
const CHECKSUM: Field = Field::new(148, 8);
const TYPE_FLAG: Field = Field::new(156, 1);
const LINK_NAME: Field = Field::new(157, 100);
const MAGIC_FIELD: Field = Field::new(257, 8);
const USER_NAME: Field = Field::new(265, 32);
const GROUP_NAME: Field = Field::new(297, 32);
const DEV_MAJOR: Field = Field::new(329, 8);
const DEV_MINOR: Field = Field::new(337, 8);
const PREFIX: Field = Field::new(345, 155);

/// Returns true if `block` carries the ustar magic and therefore holds a header.
pub fn is_header(block: &[u8]) -> bool {
    block.len() >= BLOCK_SIZE && &block[MAGIC_FIELD.offset..MAGIC_FIELD.offset + MAGIC.len()] == MAGIC
}

/// Number of bytes a payload of `size` bytes occupies once padded to whole blocks.
pub fn padded_size(size: u64) -> u64 {
    let block = BLOCK_SIZE as u64;
    size.div_ceil(block) * block
}

/// Sum of all bytes of `block`, counting the checksum field as eight spaces.
pub fn checksum(block: &HeaderBlock) -> u32 {
    block
        .iter()
        .enumerate()
        .map(|(i, &b)| if CHECKSUM.range().contains(&i) { b' ' as u32 } else { b as u32 })
        .sum()
}

/// Reads the checksum stored in `block`, if the field holds octal digits.
pub fn stored_checksum(block: &HeaderBlock) -> Option<u32> {
    parse_octal(&block[CHECKSUM.range()]).and_then(|v| u32::try_from(v).ok())
}

/// Parses an octal text field. NUL and space padding is skipped, parsing stops at
/// any other non-octal byte. Returns `None` if the field holds no digits.
fn parse_octal(field: &[u8]) -> Option<u64> {
    let mut value: u64 = 0;
    let mut found = false;
    for &b in field {
        match b {
            0 | b' ' => continue,
            b'0'..=b'7' => {
                value = value.checked_mul(8)?.checked_add((b - b'0') as u64)?;
                found = true;
            }
            _ => break,
        }
    }
    found.then_some(value)
}

/// Decodes a NUL-padded text field.
fn parse_text(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).trim().to_string()
}

fn parse_u32(field: &[u8]) -> u32 {
    parse_octal(field).and_then(|v| u32::try_from(v).ok()).unwrap_or(0)
}

fn parse_mtime(field: &[u8]) -> DateTime<Utc> {
    parse_octal(field)
        .and_then(|secs| i64::try_from(secs).ok())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .unwrap_or_else(|| {
            warn!(raw = ?String::from_utf8_lossy(field), "unreadable modification time, using current time");
            Utc::now()
        })
}

/// Copies `value` into the field, cutting it at the field width. The remainder stays NUL.
fn put_text(block: &mut HeaderBlock, field: Field, value: &[u8]) {
    let n = value.len().min(field.len);
    block[field.offset..field.offset + n].copy_from_slice(&value[..n]);
}

/// Writes `value` as octal, zero-padded on the left to `len - 1` digits and NUL-terminated.
fn put_octal(block: &mut HeaderBlock, field: Field, value: u64) {
    let width = field.len - 1;
    let digits = format!("{:0width$o}", value, width = width);
    let digits = if digits.len() > width {
        warn!(value, width, "value does not fit its octal header field, keeping the low digits");
        &digits[digits.len() - width..]
    } else {
        &digits[..]
    };
    put_text(block, field, digits.as_bytes());
    block[field.offset + width] = 0;
}

/// Device numbers are written left-aligned and NUL-padded, unlike the other numeric fields.
fn put_octal_unpadded(block: &mut HeaderBlock, field: Field, value: u32) {
    put_text(block, field, format!("{:o}", value).as_bytes());
}

/// Largest payload size the 11-digit size field can hold (8 GiB - 1).
pub const MAX_SIZE: u64 = 0o77777777777;

/// Fails with [`ArchiverError::Format`] if the size of `entry` does not fit the
/// size field. A cut-down size would no longer match the payload that follows.
pub(crate) fn check_size(entry: &ArchiveEntry) -> Result<()> {
    if entry.size() > MAX_SIZE {
        return Err(ArchiverError::Format(format!(
            "'{}' is {} bytes, more than a ustar header can describe",
            entry.name(),
            entry.size()
        )));
    }
    Ok(())
}

/// Renders the header record for `entry`.
pub(crate) fn encode(entry: &ArchiveEntry) -> Result<HeaderBlock> {
    check_size(entry)?;
    let mut block = [0u8; BLOCK_SIZE];
    let owner = entry.owner();

    put_text(&mut block, NAME, normalize_name(entry.name()).as_bytes());
    put_octal(&mut block, MODE, entry.permissions() as u64);
    put_octal(&mut block, UID, owner.user_id() as u64);
    put_octal(&mut block, GID, owner.group_id() as u64);
    put_octal(&mut block, SIZE, entry.size());
    put_octal(&mut block, MTIME, u64::try_from(entry.modified().timestamp()).unwrap_or(0));
    block[TYPE_FLAG.offset] = entry.kind().flag();
    put_text(&mut block, LINK_NAME, entry.link_target().as_bytes());
    put_text(&mut block, MAGIC_FIELD, MAGIC_VERSION);
    put_text(&mut block, USER_NAME, owner.user_name().as_bytes());
    put_text(&mut block, GROUP_NAME, owner.group_name().as_bytes());
    put_octal_unpadded(&mut block, DEV_MAJOR, entry.dev_major());
    put_octal_unpadded(&mut block, DEV_MINOR, entry.dev_minor());
    // prefix is never written

    block[CHECKSUM.range()].fill(b' ');
    let sum = checksum(&block);
    put_text(&mut block, CHECKSUM, format!("{:06o}\0 ", sum).as_bytes());
    Ok(block)
}

/// Decodes a header record. The record itself is kept as the entry's cached header.
pub(crate) fn decode(block: &HeaderBlock) -> Result<ArchiveEntry> {
    let flag = block[TYPE_FLAG.offset];
    let kind = EntryKind::from_flag(flag).ok_or(ArchiverError::UnknownTypeFlag(flag))?;

    let mut entry = ArchiveEntry::new(parse_text(&block[NAME.range()]), kind);
    entry.set_permissions(parse_u32(&block[MODE.range()]));
    entry.set_modified(parse_mtime(&block[MTIME.range()]));
    entry.set_size(parse_octal(&block[SIZE.range()]).unwrap_or(0));
    entry.set_owner(Owner::new(
        parse_u32(&block[UID.range()]),
        parse_text(&block[USER_NAME.range()]),
        parse_u32(&block[GID.range()]),
        parse_text(&block[GROUP_NAME.range()]),
    ));
    entry.set_link_target(parse_text(&block[LINK_NAME.range()]));
    entry.set_dev_major(parse_u32(&block[DEV_MAJOR.range()]));
    entry.set_dev_minor(parse_u32(&block[DEV_MINOR.range()]));
    entry.set_prefix(parse_text(&block[PREFIX.range()]));
    entry.set_header(*block);
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ArchiveEntry {
        let mut entry = ArchiveEntry::new("./docs/readme.txt", EntryKind::File);
        entry.set_permissions(0o644);
        entry.set_size(10);
        entry.set_modified(Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        entry.set_owner(Owner::new(1000, "alice", 100, "users"));
        entry
    }

    #[test]
    fn test_encode_field_layout() {
        let block = encode(&sample()).unwrap();

        assert_eq!(&block[0..15], b"docs/readme.txt");
        assert!(block[15..100].iter().all(|&b| b == 0));
        assert_eq!(&block[100..108], b"0000644\0");
        assert_eq!(&block[108..116], b"0001750\0");
        assert_eq!(&block[116..124], b"0000144\0");
        assert_eq!(&block[124..136], b"00000000012\0");
        assert_eq!(&block[136..148], format!("{:011o}\0", 1_700_000_000u64).as_bytes());
        assert_eq!(block[156], b'0');
        assert_eq!(&block[257..265], b"ustar  \0");
        assert_eq!(&block[265..270], b"alice");
        assert_eq!(&block[297..302], b"users");
        assert!(block[345..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_device_fields_are_nul_padded() {
        let mut entry = ArchiveEntry::new("dev/tty0", EntryKind::CharDevice);
        entry.set_dev_major(4);
        entry.set_dev_minor(64);
        let block = encode(&entry).unwrap();

        assert_eq!(&block[329..337], b"4\0\0\0\0\0\0\0");
        assert_eq!(&block[337..345], b"100\0\0\0\0\0");
        assert_eq!(block[156], b'3');
    }

    #[test]
    fn test_checksum_matches_recomputation() {
        let block = encode(&sample()).unwrap();
        let stored = stored_checksum(&block).unwrap();
        assert_eq!(stored, checksum(&block));
        assert_eq!(block[154], 0);
        assert_eq!(block[155], b' ');
    }

    #[test]
    fn test_checksum_field_is_octal() {
        let block = encode(&sample()).unwrap();
        let text = std::str::from_utf8(&block[148..154]).unwrap();
        assert!(text.bytes().all(|b| (b'0'..=b'7').contains(&b)), "{text}");
    }

    #[test]
    fn test_long_names_are_truncated() {
        let long = "d/".repeat(80);
        let mut entry = ArchiveEntry::new(long.clone(), EntryKind::Directory);
        entry.set_owner(Owner::new(0, "u".repeat(40), 0, "g".repeat(40)));
        let block = encode(&entry).unwrap();

        assert_eq!(&block[0..100], &long.as_bytes()[..100]);
        assert_eq!(&block[265..297], "u".repeat(32).as_bytes());
        assert_eq!(&block[297..329], "g".repeat(32).as_bytes());
    }

    #[test]
    fn test_decode_keeps_fields_and_record() {
        let block = encode(&sample()).unwrap();
        let entry = decode(&block).unwrap();

        assert_eq!(entry.name(), "docs/readme.txt");
        assert_eq!(entry.kind(), EntryKind::File);
        assert_eq!(entry.permissions(), 0o644);
        assert_eq!(entry.size(), 10);
        assert_eq!(entry.modified().timestamp(), 1_700_000_000);
        assert_eq!(entry.owner(), &Owner::new(1000, "alice", 100, "users"));
        assert_eq!(entry.link_target(), "");
        assert_eq!(entry.header(), Some(&block));
    }

    #[test]
    fn test_decode_unknown_type_flag() {
        let mut block = encode(&sample()).unwrap();
        block[156] = b'7';
        match decode(&block) {
            Err(ArchiverError::UnknownTypeFlag(b'7')) => {}
            other => panic!("unexpected result: {:?}", other.map(|e| e.name().to_string())),
        }
    }

    #[test]
    fn test_decode_nul_type_flag_is_file() {
        let mut block = encode(&sample()).unwrap();
        block[156] = 0;
        assert_eq!(decode(&block).unwrap().kind(), EntryKind::File);
    }

    #[test]
    fn test_unreadable_mtime_falls_back_to_now() {
        let mut block = encode(&sample()).unwrap();
        block[136..148].copy_from_slice(b"zzzzzzzzzzz\0");
        let before = Utc::now().timestamp();
        let entry = decode(&block).unwrap();
        assert!(entry.modified().timestamp() >= before);
    }

    #[test]
    fn test_oversized_payload_is_rejected() {
        let mut entry = sample();
        entry.set_size(MAX_SIZE);
        let block = encode(&entry).unwrap();
        assert_eq!(&block[124..136], b"77777777777\0");

        entry.set_size(MAX_SIZE + 1);
        match encode(&entry) {
            Err(ArchiverError::Format(message)) => assert!(message.contains("docs/readme.txt"), "{message}"),
            other => panic!("unexpected result: {:?}", other.map(|b| b[124..136].to_vec())),
        }
    }

    #[test]
    fn test_large_ids_keep_low_digits() {
        let mut entry = sample();
        entry.set_owner(Owner::new(0o17777777, "big", 0, "root"));
        let block = encode(&entry).unwrap();
        assert_eq!(&block[108..116], b"7777777\0");
    }

    #[test]
    fn test_parse_octal_variants() {
        assert_eq!(parse_octal(b"0000644\0"), Some(0o644));
        assert_eq!(parse_octal(b"  755 \0"), Some(0o755));
        assert_eq!(parse_octal(b"12\0\0\0\0\0\0"), Some(0o12));
        assert_eq!(parse_octal(b"\0\0\0\0"), None);
        assert_eq!(parse_octal(b"17x7"), Some(0o17));
    }

    #[test]
    fn test_is_header_and_padding() {
        let block = encode(&sample()).unwrap();
        assert!(is_header(&block));
        assert!(!is_header(&[0u8; BLOCK_SIZE]));
        assert_eq!(padded_size(0), 0);
        assert_eq!(padded_size(1), 512);
        assert_eq!(padded_size(512), 512);
        assert_eq!(padded_size(513), 1024);
    }
}
