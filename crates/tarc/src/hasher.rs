//! Hash pieces straight from the files on disk.
use std::{
    io::{self, SeekFrom},
    path::Path,
};

use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
};
use tracing::debug;

use crate::{
    error::{Error, ReadError},
    metainfo::TorrentInfo,
    reconcile::PieceStatus,
};

/// Bytes read from disk at a time, regardless of the piece length.
pub const READ_CHUNK: usize = 64 * 1024;

/// The result of hashing one piece.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceOutcome {
    pub status: PieceStatus,
    /// Set when the piece is missing because a file could not be read, as
    /// opposed to not existing.
    pub error: Option<ReadError>,
}

impl PieceOutcome {
    fn status(status: PieceStatus) -> Self {
        Self { status, error: None }
    }

    fn unreadable(error: ReadError) -> Self {
        Self { status: PieceStatus::Missing, error: Some(error) }
    }
}

/// Why a segment could not be read.
enum SegmentError {
    /// Not there, or too short.
    Absent,
    Io(io::Error),
}

impl From<io::Error> for SegmentError {
    fn from(value: io::Error) -> Self {
        match value.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::UnexpectedEof => {
                SegmentError::Absent
            }
            _ => SegmentError::Io(value),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PieceHasher {
    chunk_size: usize,
}

impl Default for PieceHasher {
    fn default() -> Self {
        Self { chunk_size: READ_CHUNK }
    }
}

impl PieceHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Change how many bytes are read at a time.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Read the bytes of a piece from the files under `root` and compare
    /// their hash with the one on the metainfo.
    ///
    /// A piece is only hashed when every byte of it could be read, if a
    /// file is absent or too short the piece is `Missing`. Any other I/O
    /// failure also makes it `Missing`, but the cause is kept in
    /// [`PieceOutcome::error`].
    ///
    /// # Errors
    ///
    /// Only if `index` is not a piece of the torrent.
    pub async fn hash_piece(
        &self,
        info: &TorrentInfo,
        root: &Path,
        index: usize,
    ) -> Result<PieceOutcome, Error> {
        let (Some(segments), Some(expected)) =
            (info.segments(index), info.piece_hash(index))
        else {
            return Err(Error::PieceOutOfRange {
                index,
                count: info.piece_count(),
            });
        };

        let piece_size = info.piece_size(index) as usize;
        let mut buf = vec![0u8; self.chunk_size.min(piece_size)];
        let mut hasher = sha1_smol::Sha1::new();

        for segment in segments {
            let file = &info.files[segment.file];

            if file.padding {
                buf.fill(0);
                let mut left = segment.len as usize;
                while left > 0 {
                    let n = left.min(buf.len());
                    hasher.update(&buf[..n]);
                    left -= n;
                }
                continue;
            }

            let path = file.local_path(root);
            let read = Self::read_segment(
                &path,
                segment.offset,
                segment.len,
                &mut buf,
                &mut hasher,
            )
            .await;

            match read {
                Ok(()) => {}
                Err(SegmentError::Absent) => {
                    debug!("piece {index}: {path:?} is absent or too short");
                    return Ok(PieceOutcome::status(PieceStatus::Missing));
                }
                Err(SegmentError::Io(err)) => {
                    debug!("piece {index}: could not read {path:?}: {err}");
                    return Ok(PieceOutcome::unreadable(ReadError::new(
                        file.relative_path(),
                        &err,
                    )));
                }
            }
        }

        let hash = hasher.digest().bytes();

        if hash == *expected {
            Ok(PieceOutcome::status(PieceStatus::Verified))
        } else {
            debug!("piece {index} is corrupted.");
            Ok(PieceOutcome::status(PieceStatus::Corrupt))
        }
    }

    /// Feed `len` bytes of the file at `path`, starting at `offset`, into
    /// the hasher.
    async fn read_segment(
        path: &Path,
        offset: u64,
        len: u64,
        buf: &mut [u8],
        hasher: &mut sha1_smol::Sha1,
    ) -> Result<(), SegmentError> {
        let mut file = File::open(path).await?;

        let metadata = file.metadata().await?;
        if !metadata.is_file() || metadata.len() < offset + len {
            return Err(SegmentError::Absent);
        }

        file.seek(SeekFrom::Start(offset)).await?;

        let mut left = len;
        while left > 0 {
            let n = left.min(buf.len() as u64) as usize;
            file.read_exact(&mut buf[..n]).await?;
            hasher.update(&buf[..n]);
            left -= n as u64;
        }

        Ok(())
    }
}
