//! Metainfo is a .torrent file with information about the Torrent.
//!
//! Only the parts needed to locate and verify the content on disk are kept:
//! the ordered file list, the piece length and the piece hashes. The
//! info-hash is computed over the canonical re-encoding of the `info`
//! dictionary, so trackers, comments and any other surrounding keys never
//! change the identity of a torrent.

use std::{
    collections::BTreeMap,
    fmt::Display,
    ops::{Deref, Range, RangeInclusive},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{
    bencode::{self, Value},
    error::{DecodeError, DecodeErrorKind},
};

/// Size of a SHA-1 digest, and of each entry of `pieces`.
pub const HASH_LEN: usize = 20;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct InfoHash(pub [u8; 20]);

impl InfoHash {
    /// SHA-1 of a canonical info dictionary.
    pub fn of(buf: &[u8]) -> Self {
        let mut hasher = sha1_smol::Sha1::new();
        hasher.update(buf);
        InfoHash(hasher.digest().bytes())
    }
}

impl Display for InfoHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.to_string();
        f.write_str(&s[..10])
    }
}

impl Deref for InfoHash {
    type Target = [u8; 20];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<[u8; 20]> for InfoHash {
    fn from(value: [u8; 20]) -> Self {
        Self(value)
    }
}

impl From<InfoHash> for [u8; 20] {
    fn from(value: InfoHash) -> Self {
        value.0
    }
}

impl TryFrom<Vec<u8>> for InfoHash {
    type Error = &'static str;
    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        if value.len() != 20 {
            return Err("The infohash must have exactly 20 bytes");
        }
        let mut buff = [0u8; 20];
        buff[..20].copy_from_slice(&value[..20]);
        Ok(InfoHash(buff))
    }
}

impl std::str::FromStr for InfoHash {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let buff = hex::decode(s).map_err(|e| e.to_string())?;
        InfoHash::try_from(buff).map_err(str::to_owned)
    }
}

impl Serialize for InfoHash {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for InfoHash {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// How the torrent declared its files. Both layouts end up as one ordered
/// file list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Layout {
    SingleFile,
    MultiFile,
}

/// A file of the torrent's logical byte stream.
#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub struct File {
    /// Path relative to the scan root. The first item is the torrent name
    /// (the file itself on single-file torrents, the root folder otherwise).
    pub path: Vec<String>,
    /// Length of the file in bytes.
    pub length: u64,
    /// Where the file starts in the torrent stream.
    pub offset: u64,
    /// BEP 47 pad file: zeros that are never written to disk.
    pub padding: bool,
}

impl File {
    /// The `/` separated path, as the scanner reports it.
    pub fn relative_path(&self) -> String {
        self.path.join("/")
    }

    /// Absolute location of the file under `root`.
    pub fn local_path(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        path.extend(&self.path);
        path
    }

    /// Range of the torrent stream covered by the file.
    pub fn stream_range(&self) -> Range<u64> {
        self.offset..self.offset + self.length
    }
}

/// A slice of one file that belongs to a piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Index into `TorrentInfo::files`.
    pub file: usize,
    /// Offset within the file.
    pub offset: u64,
    pub len: u64,
}

/// The decoded metadata of a torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentInfo {
    pub info_hash: InfoHash,
    pub name: String,
    pub layout: Layout,
    /// length in bytes of each piece, the last piece may have a smaller length
    pub piece_length: u64,
    pub pieces: Vec<[u8; HASH_LEN]>,
    pub files: Vec<File>,
    /// Announce URLs, informational only.
    pub trackers: Vec<String>,
    total_length: u64,
}

/// Typed access to the keys of a dictionary, tracking the field path for
/// error reporting.
struct Fields<'a> {
    dict: &'a BTreeMap<Vec<u8>, Value>,
    path: String,
}

impl<'a> Fields<'a> {
    fn new(value: &'a Value, path: &str) -> Result<Self, DecodeError> {
        let dict = value.as_dict().ok_or_else(|| {
            DecodeError::new(
                DecodeErrorKind::InvalidType,
                format!("expected a dictionary, found a {}", value.type_name()),
            )
            .at(path)
        })?;
        Ok(Self { dict, path: path.to_owned() })
    }

    fn path(&self, key: &str) -> String {
        if self.path.is_empty() {
            key.to_owned()
        } else {
            format!("{}.{key}", self.path)
        }
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        self.dict.get(key.as_bytes())
    }

    fn required(&self, key: &str) -> Result<&'a Value, DecodeError> {
        self.get(key).ok_or_else(|| DecodeError::missing_field(self.path(key)))
    }

    fn wrong_type(&self, key: &str, expected: &str, found: &Value) -> DecodeError {
        DecodeError::new(
            DecodeErrorKind::InvalidType,
            format!("expected {expected}, found a {}", found.type_name()),
        )
        .at(self.path(key))
    }

    fn int(&self, key: &str) -> Result<i64, DecodeError> {
        let value = self.required(key)?;
        value.as_int().ok_or_else(|| self.wrong_type(key, "an integer", value))
    }

    fn bytes(&self, key: &str) -> Result<&'a [u8], DecodeError> {
        let value = self.required(key)?;
        value
            .as_bytes()
            .ok_or_else(|| self.wrong_type(key, "a byte string", value))
    }

    fn string(&self, key: &str) -> Result<String, DecodeError> {
        let bytes = self.bytes(key)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| {
            DecodeError::new(DecodeErrorKind::InvalidType, "not valid UTF-8")
                .at(self.path(key))
        })
    }

    fn list(&self, key: &str) -> Result<&'a [Value], DecodeError> {
        let value = self.required(key)?;
        value.as_list().ok_or_else(|| self.wrong_type(key, "a list", value))
    }
}

/// A path component may never escape the directory it is joined to.
fn check_component(component: &str, path: &str) -> Result<(), DecodeError> {
    let unsafe_component = component.is_empty()
        || component == "."
        || component == ".."
        || component.contains(['/', '\\', '\0']);

    if unsafe_component {
        return Err(DecodeError::new(
            DecodeErrorKind::UnsafePath,
            format!("path component {component:?} is not allowed"),
        )
        .at(path));
    }
    Ok(())
}

fn non_negative(value: i64, path: String) -> Result<u64, DecodeError> {
    u64::try_from(value).map_err(|_| {
        DecodeError::new(
            DecodeErrorKind::LengthMismatch,
            format!("length cannot be negative ({value})"),
        )
        .at(path)
    })
}

impl TorrentInfo {
    /// Decode a .torrent file.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, DecodeError> {
        let root = bencode::decode(buf)?;
        let meta = Fields::new(&root, "")?;
        let info_value = meta.required("info")?;

        let canonical = bencode::encode(info_value).map_err(|_| {
            DecodeError::new(
                DecodeErrorKind::InvalidType,
                "info dictionary could not be re-encoded",
            )
            .at("info")
        })?;
        let info_hash = InfoHash::of(&canonical);

        let trackers = Self::trackers(&meta);
        let info = Fields::new(info_value, "info")?;

        let name = info.string("name")?;
        check_component(&name, &info.path("name"))?;

        let piece_length = info.int("piece length")?;
        let piece_length = u64::try_from(piece_length)
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| {
                DecodeError::new(
                    DecodeErrorKind::LengthMismatch,
                    format!("piece length must be positive ({piece_length})"),
                )
                .at(info.path("piece length"))
            })?;

        let raw_pieces = info.bytes("pieces")?;
        if raw_pieces.is_empty() || raw_pieces.len() % HASH_LEN != 0 {
            return Err(DecodeError::new(
                DecodeErrorKind::LengthMismatch,
                format!(
                    "pieces must be a non-empty multiple of {HASH_LEN} bytes, \
                     found {}",
                    raw_pieces.len()
                ),
            )
            .at(info.path("pieces")));
        }
        let pieces: Vec<[u8; HASH_LEN]> = raw_pieces
            .chunks_exact(HASH_LEN)
            .map(|chunk| {
                let mut hash = [0u8; HASH_LEN];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        let (layout, files) =
            match (info.get("length").is_some(), info.get("files").is_some()) {
                (true, false) => {
                    let length = non_negative(
                        info.int("length")?,
                        info.path("length"),
                    )?;
                    let file = File {
                        path: vec![name.clone()],
                        length,
                        offset: 0,
                        padding: false,
                    };
                    (Layout::SingleFile, vec![file])
                }
                (false, true) => {
                    (Layout::MultiFile, Self::files(&info, &name)?)
                }
                (true, true) => {
                    return Err(DecodeError::new(
                        DecodeErrorKind::InvalidType,
                        "both `length` and `files` are present",
                    )
                    .at("info"));
                }
                (false, false) => {
                    return Err(DecodeError::missing_field("info.length"));
                }
            };

        let total_length = files.iter().map(|f| f.length).sum::<u64>();
        let info = TorrentInfo {
            info_hash,
            name,
            layout,
            piece_length,
            pieces,
            files,
            trackers,
            total_length,
        };
        info.check_lengths()?;

        Ok(info)
    }

    fn files(info: &Fields, name: &str) -> Result<Vec<File>, DecodeError> {
        let list = info.list("files")?;
        let mut files = Vec::with_capacity(list.len());
        let mut offset = 0u64;

        for (i, value) in list.iter().enumerate() {
            let entry = Fields::new(value, &format!("{}[{i}]", info.path("files")))?;
            let length = non_negative(entry.int("length")?, entry.path("length"))?;

            let components = entry.list("path")?;
            if components.is_empty() {
                return Err(DecodeError::new(
                    DecodeErrorKind::UnsafePath,
                    "file path is empty",
                )
                .at(entry.path("path")));
            }

            let mut path = Vec::with_capacity(components.len() + 1);
            path.push(name.to_owned());
            for (j, component) in components.iter().enumerate() {
                let at = format!("{}[{j}]", entry.path("path"));
                let component = component.as_str().ok_or_else(|| {
                    DecodeError::new(
                        DecodeErrorKind::InvalidType,
                        "path components must be UTF-8 byte strings",
                    )
                    .at(at.clone())
                })?;
                check_component(component, &at)?;
                path.push(component.to_owned());
            }

            let padding = entry
                .get("attr")
                .and_then(Value::as_bytes)
                .is_some_and(|attr| attr.contains(&b'p'));

            files.push(File { path, length, offset, padding });
            offset = offset.checked_add(length).ok_or_else(|| {
                DecodeError::new(
                    DecodeErrorKind::LengthMismatch,
                    "total length overflows",
                )
                .at(info.path("files"))
            })?;
        }

        Ok(files)
    }

    /// `announce` followed by the flattened `announce-list`, without
    /// duplicates. Malformed entries are ignored, they play no role in the
    /// identity nor the verification of the torrent.
    fn trackers(meta: &Fields) -> Vec<String> {
        let mut trackers: Vec<String> = Vec::new();
        let mut push = |url: Option<&str>| {
            if let Some(url) = url {
                if !trackers.iter().any(|t| t == url) {
                    trackers.push(url.to_owned());
                }
            }
        };

        push(meta.get("announce").and_then(Value::as_str));

        let tiers = meta.get("announce-list").and_then(Value::as_list);
        for tier in tiers.unwrap_or_default() {
            for url in tier.as_list().unwrap_or_default() {
                push(url.as_str());
            }
        }

        trackers
    }

    /// The sum of the file lengths must be exactly covered by the pieces,
    /// with a last piece of `(0, piece_length]` bytes. The piece stream
    /// itself must be addressable in a u64.
    fn check_lengths(&self) -> Result<(), DecodeError> {
        let count = self.pieces.len() as u64;

        let fits = match count.checked_mul(self.piece_length) {
            Some(upper) if count > 0 => {
                let lower = upper - self.piece_length;
                self.total_length > lower && self.total_length <= upper
            }
            _ => false,
        };

        if !fits {
            return Err(DecodeError::new(
                DecodeErrorKind::LengthMismatch,
                format!(
                    "files total {} bytes, which {} pieces of {} bytes do not \
                     cover exactly",
                    self.total_length, count, self.piece_length
                ),
            )
            .at("info.pieces"));
        }
        Ok(())
    }

    /// Get the size in bytes of the files of the torrent.
    #[inline]
    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// How many pieces there are.
    #[inline]
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Get the size (in bytes) of a piece, the last piece of a torrent
    /// might be smaller than the other pieces.
    pub fn piece_size(&self, index: usize) -> u64 {
        self.piece_range(index).map(|r| r.end - r.start).unwrap_or(0)
    }

    /// The bytes of the torrent stream covered by a piece.
    pub fn piece_range(&self, index: usize) -> Option<Range<u64>> {
        if index >= self.piece_count() {
            return None;
        }
        let start = index as u64 * self.piece_length;
        let end = start.saturating_add(self.piece_length).min(self.total_length);
        Some(start..end)
    }

    pub fn piece_hash(&self, index: usize) -> Option<&[u8; HASH_LEN]> {
        self.pieces.get(index)
    }

    /// Map a piece to the file slices it is made of, in stream order.
    /// Zero-length files never appear.
    pub fn segments(&self, index: usize) -> Option<Vec<Segment>> {
        let range = self.piece_range(index)?;

        // first file that ends after the start of the piece
        let first =
            self.files.partition_point(|f| f.offset + f.length <= range.start);

        let segments = self.files[first..]
            .iter()
            .enumerate()
            .take_while(|(_, f)| f.offset < range.end)
            .filter_map(|(i, f)| {
                let start = range.start.max(f.offset);
                let end = range.end.min(f.offset + f.length);
                (end > start).then_some(Segment {
                    file: first + i,
                    offset: start - f.offset,
                    len: end - start,
                })
            })
            .collect();

        Some(segments)
    }

    /// Pieces that hold at least one byte of the file. `None` for zero-length
    /// files, which no piece depends on.
    pub fn file_pieces(&self, file: usize) -> Option<RangeInclusive<usize>> {
        let f = self.files.get(file)?;
        if f.length == 0 {
            return None;
        }
        let first = f.offset / self.piece_length;
        let last = (f.offset + f.length - 1) / self.piece_length;
        Some(first as usize..=last as usize)
    }
}
