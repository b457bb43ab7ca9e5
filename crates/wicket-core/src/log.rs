//! The on-disk log file: a 16-byte dual-slot header followed by an
//! append-only stream of opcode-tagged records.
//!
//! The header is `magic(3) || flag(1) || slot_a(6) || slot_b(6)`. `flag`
//! selects which slot currently holds the committed end-of-data pointer.
//! Every [`LogFile::append`] writes the new pointer into the *other* slot
//! first, then flips `flag` as the last, single-byte write. A crash between
//! those two writes leaves the previously-committed slot untouched and
//! `flag` still pointing at it, so [`LogFile::open`] never observes a torn
//! pointer.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Result, StoreError};

const MAGIC: [u8; 3] = *b"zzz";
/// Size of the fixed header: magic (3) + flag (1) + two 6-byte end pointers.
pub const HEADER_LEN: u64 = 16;

/// An open log file, tracking the committed end-of-data pointer.
pub struct LogFile {
    file: File,
    ptr: u64,
}

impl LogFile {
    /// Creates a fresh log file at `path` with both slots pointing just past
    /// the header. Fails if `path` already exists.
    pub fn create(path: &Path) -> Result<()> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let mut header = [0u8; 16];
        header[0..3].copy_from_slice(&MAGIC);
        header[3] = 0;
        header[4..10].copy_from_slice(&HEADER_LEN.to_be_bytes()[2..8]);
        header[10..16].copy_from_slice(&HEADER_LEN.to_be_bytes()[2..8]);
        file.write_all(&header)?;
        Ok(())
    }

    /// Opens an existing log file for read/write, validating its header and
    /// seeking to the committed end pointer.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corruption`] if the magic, flag byte, or end
    /// pointer fail their structural checks.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut header = [0u8; 16];
        file.read_exact(&mut header)?;

        if header[0..3] != MAGIC {
            return Err(StoreError::Corruption("bad header magic".into()));
        }
        let flag = header[3];
        if flag > 1 {
            return Err(StoreError::Corruption(format!("invalid header flag {flag}")));
        }

        let slot_offset = if flag == 0 { 4usize } else { 10usize };
        let end = read_u48(&header[slot_offset..slot_offset + 6]);

        let file_len = file.metadata()?.len();
        if end < HEADER_LEN || end > file_len {
            return Err(StoreError::Corruption(format!(
                "end pointer {end} outside file of length {file_len}"
            )));
        }

        Ok(Self { file, ptr: end })
    }

    /// The committed end-of-data pointer (always `>= HEADER_LEN`).
    #[must_use]
    pub fn end(&self) -> u64 {
        self.ptr
    }

    /// Reads every committed record byte, i.e. the range `[HEADER_LEN,
    /// end())`.
    pub fn read_committed(&mut self) -> Result<Vec<u8>> {
        let len = usize::try_from(self.ptr - HEADER_LEN)
            .map_err(|_| StoreError::Corruption("log too large to load".into()))?;
        let mut buf = vec![0u8; len];
        self.file.seek(SeekFrom::Start(HEADER_LEN))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Appends `record` and commits it via the dual-slot header protocol.
    ///
    /// The new end pointer is written into the currently-inactive slot,
    /// then the single flag byte is flipped last, so a crash at any point
    /// leaves either the old commit or the new one fully intact.
    pub fn append(&mut self, record: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(self.ptr))?;
        self.file.write_all(record)?;
        let newptr = self.file.stream_position()?;

        let mut flag_byte = [0u8; 1];
        self.file.seek(SeekFrom::Start(3))?;
        self.file.read_exact(&mut flag_byte)?;

        let (new_flag, slot_offset) = if flag_byte[0] == 0 { (1u8, 10u64) } else { (0u8, 4u64) };

        self.file.seek(SeekFrom::Start(slot_offset))?;
        self.file.write_all(&newptr.to_be_bytes()[2..8])?;
        self.file.flush()?;

        self.file.seek(SeekFrom::Start(3))?;
        self.file.write_all(&[new_flag])?;
        self.file.flush()?;

        self.ptr = newptr;
        Ok(())
    }
}

fn read_u48(b: &[u8]) -> u64 {
    u64::from_be_bytes([0, 0, b[0], b[1], b[2], b[3], b[4], b[5]])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn create_then_open_round_trips_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.db");
        LogFile::create(&path).unwrap();
        let mut log = LogFile::open(&path).unwrap();
        assert_eq!(log.end(), HEADER_LEN);
        assert!(log.read_committed().unwrap().is_empty());
    }

    #[test]
    fn append_persists_and_flips_slot_each_time() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.db");
        LogFile::create(&path).unwrap();
        let mut log = LogFile::open(&path).unwrap();

        log.append(b"hello").unwrap();
        log.append(b"world").unwrap();
        drop(log);

        let mut log = LogFile::open(&path).unwrap();
        assert_eq!(log.read_committed().unwrap(), b"helloworld");
    }

    #[test]
    fn rejects_bad_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.db");
        std::fs::write(&path, [0u8; 16]).unwrap();
        assert!(LogFile::open(&path).is_err());
    }

    #[test]
    fn a_torn_record_past_the_committed_pointer_is_ignored_on_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.db");
        LogFile::create(&path).unwrap();
        let mut log = LogFile::open(&path).unwrap();
        log.append(b"committed").unwrap();
        let committed_end = log.end();
        drop(log);

        // Simulate a crash mid-write: bytes landed on disk past the
        // committed end pointer, but the header was never updated to
        // reference them.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"torn").unwrap();
        drop(file);

        let mut log = LogFile::open(&path).unwrap();
        assert_eq!(log.end(), committed_end);
        assert_eq!(log.read_committed().unwrap(), b"committed");
    }

    #[test]
    fn rejects_end_pointer_past_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.db");
        let mut header = [0u8; 16];
        header[0..3].copy_from_slice(b"zzz");
        header[3] = 0;
        header[4..10].copy_from_slice(&100u64.to_be_bytes()[2..8]);
        header[10..16].copy_from_slice(&100u64.to_be_bytes()[2..8]);
        std::fs::write(&path, header).unwrap();
        assert!(LogFile::open(&path).is_err());
    }
}
