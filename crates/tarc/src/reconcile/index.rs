//! Map declared torrent files to the scanned ones.
use std::sync::Arc;

use hashbrown::HashMap;

use super::types::{FileClaim, FileReport, FileStatus, PieceStatus};
use crate::{
    metainfo::{Segment, TorrentInfo},
    scanner::FileRecord,
};

/// A torrent file entry declaring a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Claim {
    pub torrent: usize,
    pub file: usize,
}

/// Every declared path of every torrent of a pass.
#[derive(Debug, Default)]
pub(crate) struct PathIndex {
    by_path: HashMap<String, Vec<Claim>>,
}

impl PathIndex {
    pub fn build(torrents: &[Arc<TorrentInfo>]) -> Self {
        let mut by_path: HashMap<String, Vec<Claim>> = HashMap::new();

        for (t, info) in torrents.iter().enumerate() {
            for (f, file) in info.files.iter().enumerate() {
                if file.padding {
                    continue;
                }
                by_path
                    .entry(file.relative_path())
                    .or_default()
                    .push(Claim { torrent: t, file: f });
            }
        }

        Self { by_path }
    }

    pub fn claims(&self, path: &str) -> &[Claim] {
        self.by_path.get(path).map(Vec::as_slice).unwrap_or_default()
    }

    /// Paths declared by more than one torrent file entry.
    pub fn collisions(&self) -> usize {
        self.by_path.values().filter(|v| v.len() > 1).count()
    }
}

/// Which declared files are on disk, per torrent.
#[derive(Debug)]
pub(crate) struct Presence {
    /// With the declared length.
    files: Vec<Vec<bool>>,
    /// With any length.
    seen: Vec<Vec<bool>>,
}

impl Presence {
    fn new(torrents: &[Arc<TorrentInfo>]) -> Self {
        let files = torrents
            .iter()
            .map(|t| t.files.iter().map(|f| f.padding).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        let seen = files.iter().map(|f| vec![false; f.len()]).collect();
        Self { files, seen }
    }

    pub fn is_present(&self, torrent: usize, file: usize) -> bool {
        self.files[torrent][file]
    }

    /// Whether any declared path of a torrent exists on disk, even with the
    /// wrong length. Empty declared files hold no data and do not count.
    pub fn has_data(&self, torrent: usize) -> bool {
        self.seen[torrent].iter().any(|seen| *seen)
    }

    /// Decide if a piece is worth hashing. `None` means every byte of it
    /// should be on disk, otherwise the piece is settled without any read.
    pub fn precheck(
        &self,
        info: &TorrentInfo,
        torrent: usize,
        segments: &[Segment],
    ) -> Option<PieceStatus> {
        let mut present = 0;
        let mut absent = 0;

        for segment in segments {
            if info.files[segment.file].padding {
                continue;
            }
            if self.is_present(torrent, segment.file) {
                present += 1;
            } else {
                absent += 1;
            }
        }

        match (present, absent) {
            (_, 0) => None,
            (0, _) => Some(PieceStatus::Missing),
            _ => Some(PieceStatus::PartiallyAvailable),
        }
    }
}

/// Classify every scanned file against the index, and record which
/// declared files are present.
pub(crate) fn classify(
    torrents: &[Arc<TorrentInfo>],
    index: &PathIndex,
    records: Vec<FileRecord>,
) -> (Vec<FileReport>, Presence) {
    let mut presence = Presence::new(torrents);

    let files = records
        .into_iter()
        .map(|record| {
            let claims: Vec<FileClaim> = index
                .claims(&record.relative_path)
                .iter()
                .map(|claim| {
                    let info = &torrents[claim.torrent];
                    let file = &info.files[claim.file];
                    let size_matches = file.length == record.size_bytes;
                    if file.length > 0 {
                        presence.seen[claim.torrent][claim.file] = true;
                    }
                    if size_matches {
                        presence.files[claim.torrent][claim.file] = true;
                    }
                    let pieces = info.file_pieces(claim.file);
                    let range = file.stream_range();

                    FileClaim {
                        info_hash: info.info_hash,
                        file_index: claim.file,
                        declared_length: file.length,
                        byte_start: range.start,
                        byte_end: range.end,
                        first_piece: pieces.as_ref().map(|p| *p.start()),
                        last_piece: pieces.as_ref().map(|p| *p.end()),
                        size_matches,
                    }
                })
                .collect();

            let status = if claims.is_empty() {
                FileStatus::Untracked
            } else if claims.iter().any(|c| c.size_matches) {
                FileStatus::Tracked
            } else {
                FileStatus::SizeMismatch
            };

            FileReport { record, status, claims }
        })
        .collect();

    (files, presence)
}
