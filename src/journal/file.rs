//! File-backed journal
//!
//! A single append-only file: fixed header, then framed records. Acks
//! are one `sync_data` per batch. Trimming rewrites `trimmed_thru` in
//! the header, and once every record is trimmed the file is truncated
//! back to the header.
//!
//! At open, a torn trailing record (written but never acked) is cut off
//! so appends continue from the last complete record. A checksum
//! mismatch in a complete record is corruption and fails the open.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use uuid::Uuid;

use super::backend::{AppendToken, JournalBackend, JournalEntry};
use super::errors::{JournalError, JournalResult};
use super::record::{Frame, JournalHeader, JournalRecord, HEADER_LEN};

/// Result of scanning a journal file
#[derive(Debug)]
pub struct JournalScan {
    pub header: JournalHeader,
    /// Every complete record, trimmed or not, in file order
    pub records: Vec<JournalRecord>,
    /// Offset just past the last complete record
    pub valid_end: u64,
    /// Bytes of torn tail after `valid_end`
    pub torn_bytes: u64,
}

impl JournalScan {
    /// Records not yet trimmed
    pub fn live_records(&self) -> impl Iterator<Item = &JournalRecord> {
        let trimmed = self.header.trimmed_thru;
        self.records.iter().filter(move |r| r.seq > trimmed)
    }
}

#[derive(Debug)]
struct FileState {
    file: File,
    header: JournalHeader,
    end_offset: u64,
    last_seq: u64,
    durable_seq: u64,
}

#[derive(Debug)]
pub struct FileJournal {
    path: PathBuf,
    state: Mutex<FileState>,
}

impl FileJournal {
    /// Create a new, empty journal, replacing any file at `path`
    pub fn create(path: &Path, fsid: Uuid) -> JournalResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| {
                JournalError::append_failed(
                    format!("Failed to create journal: {}", path.display()),
                    e,
                )
            })?;

        let header = JournalHeader::new(fsid);
        file.write_all(&header.encode())
            .map_err(|e| JournalError::append_failed("Failed to write journal header", e))?;
        file.sync_all()
            .map_err(|e| JournalError::sync_failed("Failed to sync journal header", Some(e)))?;

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(FileState {
                file,
                header,
                end_offset: HEADER_LEN as u64,
                last_seq: 0,
                durable_seq: 0,
            }),
        })
    }

    /// Open an existing journal, checking its fsid when one is given
    pub fn open(path: &Path, expected_fsid: Option<Uuid>) -> JournalResult<Self> {
        let scan = Self::scan(path)?;
        if let Some(expected) = expected_fsid {
            if scan.header.fsid != expected {
                return Err(JournalError::fsid_mismatch(expected, scan.header.fsid));
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| {
                JournalError::append_failed(
                    format!("Failed to open journal: {}", path.display()),
                    e,
                )
            })?;
        if scan.torn_bytes > 0 {
            file.set_len(scan.valid_end)
                .map_err(|e| JournalError::append_failed("Failed to cut torn journal tail", e))?;
        }

        let last_seq = scan
            .records
            .last()
            .map(|r| r.seq)
            .unwrap_or(scan.header.trimmed_thru);
        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(FileState {
                file,
                header: scan.header,
                end_offset: scan.valid_end,
                last_seq,
                durable_seq: last_seq,
            }),
        })
    }

    /// Open the journal at `path`, creating it if missing.
    ///
    /// A new journal takes `fsid`, or a fresh one if none is given.
    pub fn open_or_create(path: &Path, fsid: Option<Uuid>) -> JournalResult<Self> {
        if path.exists() {
            Self::open(path, fsid)
        } else {
            Self::create(path, fsid.unwrap_or_else(Uuid::new_v4))
        }
    }

    /// Read and validate a journal file without opening it for writing
    pub fn scan(path: &Path) -> JournalResult<JournalScan> {
        let mut data = Vec::new();
        File::open(path)
            .and_then(|mut f| f.read_to_end(&mut data))
            .map_err(|e| {
                JournalError::corruption(format!(
                    "Failed to read journal {}: {}",
                    path.display(),
                    e
                ))
            })?;

        let header = JournalHeader::decode(&data)?;
        let mut records = Vec::new();
        let mut offset = HEADER_LEN;
        let mut last_seq = 0u64;
        let mut torn_bytes = 0u64;

        while offset < data.len() {
            match JournalRecord::decode(&data[offset..]) {
                Frame::Record(record, len) => {
                    if record.seq <= last_seq {
                        return Err(JournalError::corruption_at_seq(
                            record.seq,
                            format!("Non-increasing seq after {}", last_seq),
                        ));
                    }
                    last_seq = record.seq;
                    records.push(record);
                    offset += len;
                }
                Frame::Torn => {
                    torn_bytes = (data.len() - offset) as u64;
                    break;
                }
                Frame::Corrupt(reason) => {
                    return Err(JournalError::corruption_at_offset(offset as u64, reason));
                }
            }
        }

        Ok(JournalScan {
            header,
            records,
            valid_end: offset as u64,
            torn_bytes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> JournalHeader {
        self.state.lock().header
    }

    pub fn fsid(&self) -> Uuid {
        self.state.lock().header.fsid
    }

    /// Current file length in bytes
    pub fn size(&self) -> u64 {
        self.state.lock().end_offset
    }

    pub fn durable_seq(&self) -> u64 {
        self.state.lock().durable_seq
    }

    fn write_header(state: &mut FileState) -> io::Result<()> {
        state.file.seek(SeekFrom::Start(0))?;
        state.file.write_all(&state.header.encode())
    }
}

impl JournalBackend for FileJournal {
    fn append(&self, seq: u64, payload: &[u8]) -> JournalResult<AppendToken> {
        let mut state = self.state.lock();
        if seq <= state.last_seq {
            return Err(JournalError::append_refused(format!(
                "seq {} not after last appended seq {}",
                seq, state.last_seq
            )));
        }

        let bytes = JournalRecord::new(seq, payload.to_vec()).encode();
        let offset = state.end_offset;
        state
            .file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| state.file.write_all(&bytes))
            .map_err(|e| {
                JournalError::append_failed(format!("Failed to append seq {}", seq), e)
            })?;

        state.end_offset += bytes.len() as u64;
        state.last_seq = seq;
        Ok(AppendToken::new(seq))
    }

    fn ack(&self, token: AppendToken) -> JournalResult<()> {
        let mut state = self.state.lock();
        if token.seq() <= state.durable_seq {
            return Ok(());
        }
        state.file.sync_data().map_err(|e| {
            JournalError::sync_failed(
                format!("Failed to sync journal through seq {}", token.seq()),
                Some(e),
            )
        })?;
        state.durable_seq = state.durable_seq.max(token.seq());
        Ok(())
    }

    fn trim(&self, up_to_seq: u64) -> JournalResult<()> {
        let mut state = self.state.lock();
        let up_to_seq = up_to_seq.min(state.durable_seq);
        if up_to_seq <= state.header.trimmed_thru {
            return Ok(());
        }
        state.header.trimmed_thru = up_to_seq;

        let fully_trimmed = up_to_seq >= state.last_seq;
        let result = Self::write_header(&mut state).and_then(|_| {
            if fully_trimmed {
                state.file.set_len(HEADER_LEN as u64)?;
            }
            state.file.sync_data()
        });
        result.map_err(|e| {
            JournalError::sync_failed(format!("Failed to trim through seq {}", up_to_seq), Some(e))
        })?;

        if fully_trimmed {
            state.end_offset = HEADER_LEN as u64;
        }
        Ok(())
    }

    fn replay(&self, after_seq: u64) -> JournalResult<Vec<JournalEntry>> {
        // Flushed, so the scan sees every appended byte.
        let durable_seq = {
            let mut state = self.state.lock();
            state
                .file
                .flush()
                .map_err(|e| JournalError::sync_failed("Failed to flush journal", Some(e)))?;
            state.durable_seq
        };

        let scan = Self::scan(&self.path)?;
        Ok(scan
            .live_records()
            .filter(|r| r.seq > after_seq && r.seq <= durable_seq)
            .map(|r| JournalEntry {
                seq: r.seq,
                payload: r.payload.clone(),
            })
            .collect())
    }
}
