//! A single segment file of the local log.
//!
//! Records are `[len: u32 BE][crc32: u32 BE][header crc32: u32 BE][bincode(LogEntry)]`,
//! back to back. The header checksum covers `len`, so a damaged length is
//! told apart from a record cut short by a crash. Closed segments are named `log_<first>_<last>`; the one segment
//! still accepting appends is `log_inprogress_<first>`.

use std::fs;
use std::fs::File;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::constants::RECORD_HEADER_SIZE;
use crate::constants::SEGMENT_CLOSED_PREFIX;
use crate::constants::SEGMENT_OPEN_PREFIX;
use crate::utils::file_io::decode_checksummed;
use crate::utils::file_io::decode_header;
use crate::utils::file_io::fsync_dir;
use crate::utils::file_io::open_for_append;
use crate::utils::file_io::read_exact_at;
use crate::LogEntry;
use crate::Result;
use crate::StorageError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum SegmentName {
    Closed { first: u64, last: u64 },
    Open { first: u64 },
}

impl SegmentName {
    pub(super) fn parse(name: &str) -> Option<Self> {
        if let Some(first) = name.strip_prefix(SEGMENT_OPEN_PREFIX) {
            return first.parse().ok().map(|first| SegmentName::Open { first });
        }
        let (first, last) = name.strip_prefix(SEGMENT_CLOSED_PREFIX)?.split_once('_')?;
        Some(SegmentName::Closed {
            first: first.parse().ok()?,
            last: last.parse().ok()?,
        })
    }

    pub(super) fn first(&self) -> u64 {
        match *self {
            SegmentName::Closed { first, .. } | SegmentName::Open { first } => first,
        }
    }

    pub(super) fn file_name(&self) -> String {
        match *self {
            SegmentName::Closed { first, last } => format!("{SEGMENT_CLOSED_PREFIX}{first:020}_{last:020}"),
            SegmentName::Open { first } => format!("{SEGMENT_OPEN_PREFIX}{first:020}"),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub(super) struct EntryLocation {
    pub(super) offset: u64,
    pub(super) len: u32,
    pub(super) term: u64,
}

/// State of the bytes following the last valid record.
#[derive(Debug, PartialEq, Eq)]
pub(super) enum Tail {
    Clean,
    /// Incomplete last record, a crash artifact
    Torn { valid_len: u64, reason: String },
    /// Damage that is not explained by an interrupted append
    Corrupt { offset: u64, reason: String },
}

#[derive(Debug)]
pub(super) struct Segment {
    pub(super) first_index: u64,
    pub(super) is_open: bool,
    pub(super) path: PathBuf,
    pub(super) file: Arc<File>,
    pub(super) locations: Vec<EntryLocation>,
    /// Length of the valid prefix of the file
    pub(super) bytes: u64,
}

pub(super) struct ScannedSegment {
    pub(super) segment: Segment,
    pub(super) configurations: Vec<LogEntry>,
    pub(super) tail: Tail,
}

impl Segment {
    pub(super) fn create_open(
        dir: &Path,
        first_index: u64,
    ) -> Result<Self> {
        let path = dir.join(SegmentName::Open { first: first_index }.file_name());
        let file = open_for_append(&path)?;
        fsync_dir(dir)?;
        debug!(?path, "opened new segment");
        Ok(Self {
            first_index,
            is_open: true,
            path,
            file: Arc::new(file),
            locations: Vec::new(),
            bytes: 0,
        })
    }

    /// Read every record of the file at `path`, stopping at the first one
    /// that does not verify.
    pub(super) fn scan(
        path: PathBuf,
        name: SegmentName,
    ) -> Result<ScannedSegment> {
        let buf = fs::read(&path).map_err(|e| StorageError::at_path(&path, e))?;
        let first_index = name.first();
        let mut locations = Vec::new();
        let mut configurations = Vec::new();
        let mut pos = 0usize;
        let header = RECORD_HEADER_SIZE as usize;

        let tail = loop {
            if pos == buf.len() {
                break Tail::Clean;
            }
            let rest = &buf[pos..];
            if rest.iter().all(|b| *b == 0) {
                break Tail::Torn {
                    valid_len: pos as u64,
                    reason: "zero-filled tail".to_string(),
                };
            }
            if rest.len() < header {
                break Tail::Torn {
                    valid_len: pos as u64,
                    reason: "incomplete record header".to_string(),
                };
            }
            let Some((len, crc)) = decode_header(rest) else {
                break Tail::Corrupt {
                    offset: pos as u64,
                    reason: "record header checksum mismatch".to_string(),
                };
            };
            let end = pos + header + len as usize;
            if end > buf.len() {
                break Tail::Torn {
                    valid_len: pos as u64,
                    reason: "record extends past end of file".to_string(),
                };
            }
            let payload = &buf[pos + header..end];
            if crc32fast::hash(payload) != crc {
                let reason = "checksum mismatch".to_string();
                break if end == buf.len() {
                    Tail::Torn {
                        valid_len: pos as u64,
                        reason,
                    }
                } else {
                    Tail::Corrupt {
                        offset: pos as u64,
                        reason,
                    }
                };
            }
            let expected = first_index + locations.len() as u64;
            let entry = match LogEntry::decode(payload) {
                Ok(entry) if entry.index == expected => entry,
                Ok(entry) => {
                    break Tail::Corrupt {
                        offset: pos as u64,
                        reason: format!("expected index {expected}, found {}", entry.index),
                    }
                }
                Err(e) => {
                    break Tail::Corrupt {
                        offset: pos as u64,
                        reason: format!("undecodable entry: {e}"),
                    }
                }
            };
            locations.push(EntryLocation {
                offset: pos as u64,
                len,
                term: entry.term,
            });
            if entry.is_configuration() {
                configurations.push(entry);
            }
            pos = end;
        };

        let file = open_for_append(&path)?;
        Ok(ScannedSegment {
            segment: Segment {
                first_index,
                is_open: matches!(name, SegmentName::Open { .. }),
                path,
                file: Arc::new(file),
                locations,
                bytes: pos as u64,
            },
            configurations,
            tail,
        })
    }

    /// `first_index - 1` while empty.
    pub(super) fn last_index(&self) -> u64 {
        self.first_index + self.locations.len() as u64 - 1
    }

    pub(super) fn contains(
        &self,
        index: u64,
    ) -> bool {
        index >= self.first_index && index <= self.last_index()
    }

    pub(super) fn term(
        &self,
        index: u64,
    ) -> Option<u64> {
        self.location(index).map(|l| l.term)
    }

    fn location(
        &self,
        index: u64,
    ) -> Option<&EntryLocation> {
        index
            .checked_sub(self.first_index)
            .and_then(|i| self.locations.get(i as usize))
    }

    pub(super) fn read_entry(
        &self,
        index: u64,
    ) -> Result<LogEntry> {
        let location = self.location(index).ok_or_else(|| {
            StorageError::corruption(
                self.path.display().to_string(),
                format!("index {index} missing from segment"),
            )
        })?;
        let mut buf = vec![0u8; RECORD_HEADER_SIZE as usize + location.len as usize];
        read_exact_at(&self.file, &mut buf, location.offset).map_err(|e| StorageError::at_path(&self.path, e))?;

        let payload = decode_checksummed(&buf, &self.path)?;
        let entry = LogEntry::decode(payload).map_err(|e| {
            StorageError::corruption(
                self.path.display().to_string(),
                format!("undecodable entry at offset {}: {e}", location.offset),
            )
        })?;
        if entry.index != index {
            return Err(StorageError::corruption(
                self.path.display().to_string(),
                format!("expected index {index}, found {}", entry.index),
            )
            .into());
        }
        Ok(entry)
    }

    /// Name this segment should carry on disk given its content.
    pub(super) fn expected_name(&self) -> SegmentName {
        if self.is_open {
            SegmentName::Open {
                first: self.first_index,
            }
        } else {
            SegmentName::Closed {
                first: self.first_index,
                last: self.last_index(),
            }
        }
    }

    /// Rename the file if its name no longer matches its content.
    pub(super) fn sync_name(
        &mut self,
        dir: &Path,
    ) -> Result<()> {
        let target = dir.join(self.expected_name().file_name());
        if target != self.path {
            fs::rename(&self.path, &target).map_err(|e| StorageError::at_path(&target, e))?;
            debug!(from = ?self.path, to = ?target, "renamed segment");
            self.path = target;
        }
        Ok(())
    }

    /// Seal the open segment under its closed name.
    pub(super) fn close(
        &mut self,
        dir: &Path,
    ) -> Result<()> {
        self.file.sync_all().map_err(|e| StorageError::at_path(&self.path, e))?;
        self.is_open = false;
        self.sync_name(dir)?;
        fsync_dir(dir)
    }

    /// Cut the file right after `last_index_kept`.
    pub(super) fn truncate_after(
        &mut self,
        dir: &Path,
        last_index_kept: u64,
        sync: bool,
    ) -> Result<()> {
        let kept = last_index_kept.saturating_sub(self.first_index - 1) as usize;
        if let Some(cut) = self.locations.get(kept).map(|l| l.offset) {
            self.set_len(cut, sync)?;
            self.locations.truncate(kept);
        }
        self.sync_name(dir)
    }

    pub(super) fn set_len(
        &mut self,
        len: u64,
        sync: bool,
    ) -> Result<()> {
        self.file.set_len(len).map_err(|e| StorageError::at_path(&self.path, e))?;
        if sync {
            self.file.sync_all().map_err(|e| StorageError::at_path(&self.path, e))?;
        }
        self.bytes = len;
        Ok(())
    }
}
