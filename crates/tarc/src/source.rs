//! Endpoints that know torrents, and the catalog of what they know.
use std::{
    future::Future,
    path::{Path, PathBuf},
};

use hashbrown::HashMap;
use tracing::{debug, info, warn};

use crate::{
    error::Error,
    metainfo::{InfoHash, TorrentInfo},
    reconcile::SkippedTorrent,
};

/// Undecoded metadata as an endpoint handed it over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTorrent {
    /// Where the blob came from, like the path of a `.torrent` file.
    pub origin: String,
    pub bytes: Vec<u8>,
}

/// Something that can list the torrents it knows, such as a torrent client
/// or one of its session directories.
pub trait TorrentSource {
    /// Name of the endpoint, used as the origin of its torrents in a report.
    fn name(&self) -> &str;

    fn list_torrents(
        &self,
    ) -> impl Future<Output = Result<Vec<RawTorrent>, Error>> + Send;
}

/// A directory of `.torrent` files. Subdirectories are not looked into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentDir {
    name: String,
    dir: PathBuf,
}

impl TorrentDir {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self { name: name.into(), dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn error(&self, source: std::io::Error) -> Error {
        Error::Source { name: self.name.clone(), source }
    }
}

impl TorrentSource for TorrentDir {
    fn name(&self) -> &str {
        &self.name
    }

    /// The `.torrent` files of the directory, sorted by path.
    ///
    /// # Errors
    ///
    /// If the directory, or one of the files, cannot be read.
    async fn list_torrents(&self) -> Result<Vec<RawTorrent>, Error> {
        let mut entries =
            tokio::fs::read_dir(&self.dir).await.map_err(|e| self.error(e))?;

        let mut paths = Vec::new();
        while let Some(entry) =
            entries.next_entry().await.map_err(|e| self.error(e))?
        {
            let path = entry.path();
            let is_torrent =
                path.extension().is_some_and(|ext| ext == "torrent");
            let is_file = entry
                .file_type()
                .await
                .map_err(|e| self.error(e))?
                .is_file();

            if is_torrent && is_file {
                paths.push(path);
            }
        }
        paths.sort();

        let mut torrents = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes =
                tokio::fs::read(&path).await.map_err(|e| self.error(e))?;
            torrents.push(RawTorrent {
                origin: path.to_string_lossy().into_owned(),
                bytes,
            });
        }

        debug!("{}: {} torrent files", self.name, torrents.len());

        Ok(torrents)
    }
}

/// The decoded torrents of a set of endpoints, one per info-hash.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    torrents: Vec<TorrentInfo>,
    /// Endpoints of every torrent, same index as `torrents`.
    origins: Vec<Vec<String>>,
    by_hash: HashMap<InfoHash, usize>,
    skipped: Vec<SkippedTorrent>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// List and decode the torrents of every endpoint, in order.
    ///
    /// # Errors
    ///
    /// If any endpoint fails to list its torrents. Blobs that do not decode
    /// are not errors, they end up in [`Catalog::skipped`].
    pub async fn gather<S: TorrentSource>(sources: &[S]) -> Result<Self, Error> {
        let mut catalog = Self::new();

        for source in sources {
            let raw = source.list_torrents().await?;
            info!("endpoint {} lists {} torrents", source.name(), raw.len());
            for torrent in raw {
                catalog.insert(source.name(), torrent);
            }
        }

        Ok(catalog)
    }

    /// Decode a blob listed by `endpoint`. Returns the info-hash of the
    /// torrent, or `None` if the blob was skipped.
    pub fn insert(&mut self, endpoint: &str, raw: RawTorrent) -> Option<InfoHash> {
        let info = match TorrentInfo::from_bytes(&raw.bytes) {
            Ok(info) => info,
            Err(error) => {
                warn!("skipping {}: {error}", raw.origin);
                self.skipped.push(SkippedTorrent { origin: raw.origin, error });
                return None;
            }
        };
        let info_hash = info.info_hash;

        match self.by_hash.get(&info_hash) {
            Some(&i) => {
                let origins = &mut self.origins[i];
                if !origins.iter().any(|o| o == endpoint) {
                    origins.push(endpoint.to_owned());
                }
            }
            None => {
                self.by_hash.insert(info_hash, self.torrents.len());
                self.torrents.push(info);
                self.origins.push(vec![endpoint.to_owned()]);
            }
        }

        Some(info_hash)
    }

    pub fn torrents(&self) -> &[TorrentInfo] {
        &self.torrents
    }

    pub fn get(&self, info_hash: &InfoHash) -> Option<&TorrentInfo> {
        self.by_hash.get(info_hash).map(|&i| &self.torrents[i])
    }

    /// Endpoints that listed the torrent.
    pub fn origins(&self, info_hash: &InfoHash) -> &[String] {
        self.by_hash
            .get(info_hash)
            .map(|&i| self.origins[i].as_slice())
            .unwrap_or_default()
    }

    /// Every torrent with its endpoints, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&TorrentInfo, &[String])> {
        self.torrents
            .iter()
            .zip(self.origins.iter().map(Vec::as_slice))
    }

    pub fn skipped(&self) -> &[SkippedTorrent] {
        &self.skipped
    }

    pub fn len(&self) -> usize {
        self.torrents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.torrents.is_empty()
    }
}
