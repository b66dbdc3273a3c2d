use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const HEADER_SIZE: u64 = 16; // 8 bytes for start_index + 8 bytes for entry_count
const ENTRY_HEADER_SIZE: u64 = 8; // 8 bytes for entry size

/// One file of the store log, holding entries `start_index..start_index + len`
#[derive(Debug)]
pub struct Segment {
    file: File,
    start_index: u64,
    path: PathBuf,
    entry_positions: Vec<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SegmentHeader {
    start_index: u64,
    entry_count: u64,
}

impl Segment {
    pub fn new<P: AsRef<Path>>(path: P, start_index: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut segment = Segment {
            file,
            start_index,
            path: path.as_ref().to_path_buf(),
            entry_positions: Vec::new(),
        };

        let len = segment.file.metadata()?.len();
        if len < HEADER_SIZE {
            // Crash while the header of a new segment was being written
            if len > 0 {
                log::warn!(
                    "segment {} has a torn header, starting it afresh",
                    segment.path.display()
                );
                segment.file.set_len(0)?;
            }
            segment.write_header()?;
        } else {
            segment.read_header()?;
            segment.rebuild_entry_positions()?;
        }

        Ok(segment)
    }

    fn write_header(&mut self) -> io::Result<()> {
        let header = SegmentHeader {
            start_index: self.start_index,
            entry_count: self.entry_positions.len() as u64,
        };

        let header_bytes =
            bincode::serialize(&header).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header_bytes)?;
        Ok(())
    }

    fn read_header(&mut self) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut header_bytes = vec![0u8; HEADER_SIZE as usize];
        self.file.read_exact(&mut header_bytes)?;

        let header: SegmentHeader = bincode::deserialize(&header_bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        if header.start_index != self.start_index {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "segment {} starts at {}, expected {}",
                    self.path.display(),
                    header.start_index,
                    self.start_index
                ),
            ));
        }
        Ok(())
    }

    fn read_entry_header(&mut self) -> io::Result<u64> {
        let mut size_bytes = [0u8; 8];
        self.file.read_exact(&mut size_bytes)?;
        Ok(u64::from_le_bytes(size_bytes))
    }

    /// Scans the file; a torn entry at the tail is cut off
    fn rebuild_entry_positions(&mut self) -> io::Result<()> {
        self.entry_positions.clear();
        let file_len = self.file.metadata()?.len();
        let mut pos = HEADER_SIZE;

        while pos < file_len {
            if pos + ENTRY_HEADER_SIZE > file_len {
                break;
            }
            self.file.seek(SeekFrom::Start(pos))?;
            let entry_size = self.read_entry_header()?;
            let next = pos + ENTRY_HEADER_SIZE + entry_size;
            if next > file_len {
                break;
            }
            self.entry_positions.push(pos);
            pos = next;
        }

        if pos < file_len {
            log::warn!(
                "truncating torn tail of {} at byte {}",
                self.path.display(),
                pos
            );
            self.file.set_len(pos)?;
        }
        self.write_header()
    }

    /// Appends and syncs `entries`; on failure the segment is cut back to
    /// what it held before the call
    pub fn append(&mut self, entries: &[Vec<u8>]) -> io::Result<()> {
        let old_len = self.file.seek(SeekFrom::End(0))?;
        let old_count = self.entry_positions.len();

        let result = self.write_entries(old_len, entries);
        if result.is_err() {
            self.entry_positions.truncate(old_count);
            if let Err(e) = self
                .file
                .set_len(old_len)
                .and_then(|_| self.write_header())
            {
                log::warn!(
                    "could not roll back failed append to {}: {}",
                    self.path.display(),
                    e
                );
            }
        }
        result
    }

    fn write_entries(&mut self, mut pos: u64, entries: &[Vec<u8>]) -> io::Result<()> {
        for entry in entries {
            let entry_size = entry.len() as u64;
            self.file.write_all(&entry_size.to_le_bytes())?;
            self.file.write_all(entry)?;
            self.entry_positions.push(pos);
            pos += ENTRY_HEADER_SIZE + entry_size;
        }

        self.write_header()?;
        self.file.sync_data()
    }

    /// Reads the entry at absolute log index `index`
    pub fn read_entry(&mut self, index: u64) -> io::Result<Vec<u8>> {
        let pos = index
            .checked_sub(self.start_index)
            .and_then(|offset| self.entry_positions.get(offset as usize))
            .copied()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Index out of range"))?;

        self.file.seek(SeekFrom::Start(pos))?;
        let entry_size = self.read_entry_header()?;

        let mut entry = vec![0u8; entry_size as usize];
        self.file.read_exact(&mut entry)?;
        Ok(entry)
    }

    pub fn get_start_index(&self) -> u64 {
        self.start_index
    }

    /// One past the last index held
    pub fn get_end_index(&self) -> u64 {
        self.start_index + self.entry_positions.len() as u64
    }

    pub fn len(&self) -> usize {
        self.entry_positions.len()
    }

    pub fn remove(self) -> io::Result<()> {
        let path = self.path.clone();
        drop(self);
        std::fs::remove_file(path)
    }
}
