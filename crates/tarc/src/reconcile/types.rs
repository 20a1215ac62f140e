use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    error::{DecodeError, ReadError, ScanError},
    metainfo::{InfoHash, Layout},
    scanner::FileRecord,
};

/// The state of one piece after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PieceStatus {
    /// All bytes were read and the hash matches.
    Verified,
    /// All bytes were read but the hash does not match.
    Corrupt,
    /// Some byte of the piece could not be read.
    Missing,
    /// Some of the files spanned by the piece are on disk, not all of them.
    /// A piece cannot be hashed without all of its bytes, so this counts as
    /// missing.
    PartiallyAvailable,
}

impl PieceStatus {
    pub fn is_missing(self) -> bool {
        matches!(self, PieceStatus::Missing | PieceStatus::PartiallyAvailable)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceCounts {
    pub verified: usize,
    pub corrupt: usize,
    /// Every piece that could not be hashed, partially available ones
    /// included.
    pub missing: usize,
    pub partially_available: usize,
}

impl PieceCounts {
    pub(crate) fn add(&mut self, status: PieceStatus) {
        match status {
            PieceStatus::Verified => self.verified += 1,
            PieceStatus::Corrupt => self.corrupt += 1,
            PieceStatus::Missing => self.missing += 1,
            PieceStatus::PartiallyAvailable => {
                self.missing += 1;
                self.partially_available += 1;
            }
        }
    }

    pub fn total(&self) -> usize {
        self.verified + self.corrupt + self.missing
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TorrentState {
    /// Every piece verified.
    Complete,
    /// Some data is on disk, not all of it verified.
    Incomplete,
    /// None of the files of the torrent are on disk.
    Absent,
}

/// A piece whose bytes could not be read for a reason other than the file
/// being absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceReadError {
    pub piece: usize,
    #[serde(flatten)]
    pub error: ReadError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentReport {
    pub info_hash: InfoHash,
    pub name: String,
    /// Endpoints that listed this torrent.
    pub origins: Vec<String>,
    pub layout: Layout,
    /// Declared files, padding excluded.
    pub file_count: usize,
    pub total_length: u64,
    pub trackers: Vec<String>,
    pub piece_count: usize,
    pub counts: PieceCounts,
    /// Ascending.
    pub missing_pieces: Vec<usize>,
    /// Ascending.
    pub corrupt_pieces: Vec<usize>,
    /// verified / piece_count
    pub completion: f64,
    pub state: TorrentState,
    /// Declared files that are not on disk with their declared length.
    pub missing_files: Vec<String>,
    pub read_errors: Vec<PieceReadError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileStatus {
    /// Declared by a torrent with this exact length.
    Tracked,
    /// Declared by a torrent, but with another length.
    SizeMismatch,
    /// No torrent declares this path.
    Untracked,
}

/// A torrent file entry that declares the path of a scanned file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileClaim {
    pub info_hash: InfoHash,
    /// Index into the file list of the torrent.
    pub file_index: usize,
    pub declared_length: u64,
    /// Start of the file in the torrent stream.
    pub byte_start: u64,
    /// Exclusive end of the file in the torrent stream.
    pub byte_end: u64,
    /// Pieces holding bytes of this file, `None` for empty files.
    pub first_piece: Option<usize>,
    pub last_piece: Option<usize>,
    pub size_matches: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReport {
    #[serde(flatten)]
    pub record: FileRecord,
    pub status: FileStatus,
    pub claims: Vec<FileClaim>,
}

/// A metadata blob that could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedTorrent {
    /// Where the blob came from, e.g. the .torrent file path.
    pub origin: String,
    pub error: DecodeError,
}

/// Everything one reconciliation pass found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub root: PathBuf,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
    pub torrents: Vec<TorrentReport>,
    /// In scan order.
    pub files: Vec<FileReport>,
    pub skipped: Vec<SkippedTorrent>,
    pub scan_errors: Vec<ScanError>,
}

impl ReconciliationReport {
    pub fn torrent(&self, info_hash: &InfoHash) -> Option<&TorrentReport> {
        self.torrents.iter().find(|t| t.info_hash == *info_hash)
    }

    pub fn file(&self, relative_path: &str) -> Option<&FileReport> {
        self.files.iter().find(|f| f.record.relative_path == relative_path)
    }

    /// Files that no known torrent declares.
    pub fn untracked(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(|f| f.status == FileStatus::Untracked)
    }

    /// Torrents with no data at all on disk.
    pub fn absent(&self) -> impl Iterator<Item = &TorrentReport> {
        self.torrents.iter().filter(|t| t.state == TorrentState::Absent)
    }
}

/// Sent after every hashed piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Pieces hashed so far.
    pub hashed: usize,
    /// Pieces that need hashing in this pass.
    pub queued: usize,
}
