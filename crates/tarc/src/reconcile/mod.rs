//! Match the torrents known to the endpoints against a directory tree.
//!
//! A pass walks the tree once, maps every scanned file to the torrent files
//! declaring its path, and hashes the pieces whose files are all on disk
//! with the right length. Pieces that cannot be complete are settled
//! without reading anything.
//!
//! Hashing runs on a bounded pool of tasks that pull `(torrent, piece)`
//! items from a queue. Every result goes through a channel to the future
//! driving the pass, which is the only one writing the report.
mod index;
pub mod types;

use std::{path::Path, sync::Arc};

use hashbrown::HashMap;
use time::OffsetDateTime;
use tokio::{
    select,
    sync::{mpsc, Mutex},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use types::*;

use self::index::{classify, PathIndex};
use crate::{
    config,
    error::{Error, ReadError, ScanError},
    hasher::{PieceHasher, PieceOutcome},
    metainfo::{InfoHash, TorrentInfo},
    scanner::{FileRecord, ScanOptions, Scanner},
    source::Catalog,
};

const NO_ORIGINS: &[String] = &[];

/// A piece to hash.
type WorkItem = (usize, usize);

#[derive(Debug)]
struct PieceResult {
    torrent: usize,
    piece: usize,
    outcome: PieceOutcome,
}

/// A torrent of the pass, after removing duplicates.
struct Entry {
    info: Arc<TorrentInfo>,
    origins: Vec<String>,
}

/// Piece results of one torrent, as they arrive.
#[derive(Debug, Default)]
struct Tally {
    counts: PieceCounts,
    missing: Vec<usize>,
    corrupt: Vec<usize>,
    read_errors: Vec<PieceReadError>,
}

impl Tally {
    fn record(
        &mut self,
        piece: usize,
        status: PieceStatus,
        error: Option<ReadError>,
    ) {
        self.counts.add(status);
        if status.is_missing() {
            self.missing.push(piece);
        } else if status == PieceStatus::Corrupt {
            self.corrupt.push(piece);
        }
        if let Some(error) = error {
            self.read_errors.push(PieceReadError { piece, error });
        }
    }
}

/// Runs reconciliation passes. A `Reconciler` holds no state between
/// passes and can run any number of them, one after another or at the
/// same time.
#[derive(Debug, Clone)]
pub struct Reconciler {
    workers: usize,
    scanner: Scanner,
    hasher: PieceHasher,
    progress: Option<mpsc::Sender<Progress>>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self {
            workers: config::default_workers(),
            scanner: Scanner::default(),
            hasher: PieceHasher::default(),
            progress: None,
        }
    }
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many pieces are hashed at the same time.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn scan_options(mut self, options: ScanOptions) -> Self {
        self.scanner = Scanner::new(options);
        self
    }

    pub fn hasher(mut self, hasher: PieceHasher) -> Self {
        self.hasher = hasher;
        self
    }

    /// Send a [`Progress`] after every hashed piece. The pass waits for the
    /// receiver to make room, events are never dropped.
    pub fn progress(mut self, tx: mpsc::Sender<Progress>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Reconcile `torrents` against the tree under `root`.
    ///
    /// Torrents with the same info-hash are reconciled once, the first one
    /// wins.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`] if `cancel` fires before the report is
    /// returned, in which case every task of the pass has stopped. A lost
    /// worker task is [`Error::Worker`].
    pub async fn reconcile(
        &self,
        torrents: &[TorrentInfo],
        root: impl AsRef<Path>,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationReport, Error> {
        let entries = torrents.iter().map(|t| (t, NO_ORIGINS));
        self.run(dedup(entries), Vec::new(), root.as_ref(), cancel).await
    }

    /// Same as [`Reconciler::reconcile`] with the torrents of a catalog,
    /// the report also lists the endpoints of each torrent and the torrents
    /// that could not be decoded.
    pub async fn reconcile_catalog(
        &self,
        catalog: &Catalog,
        root: impl AsRef<Path>,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationReport, Error> {
        let entries = dedup(catalog.iter());
        let skipped = catalog.skipped().to_vec();
        self.run(entries, skipped, root.as_ref(), cancel).await
    }

    #[tracing::instrument(skip_all, fields(root = %root.display()))]
    async fn run(
        &self,
        entries: Vec<Entry>,
        skipped: Vec<SkippedTorrent>,
        root: &Path,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationReport, Error> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let started_at = OffsetDateTime::now_utc();
        let torrents: Arc<[Arc<TorrentInfo>]> =
            entries.iter().map(|e| e.info.clone()).collect();

        let index = PathIndex::build(&torrents);
        info!(
            "reconciling {} torrents, {} paths declared more than once",
            torrents.len(),
            index.collisions()
        );

        let (records, scan_errors) = self.scan(root, cancel).await?;
        info!("scanned {} files, {} errors", records.len(), scan_errors.len());

        let (files, presence) = classify(&torrents, &index, records);

        let mut tallies: Vec<Tally> =
            torrents.iter().map(|_| Tally::default()).collect();
        let mut work: Vec<WorkItem> = Vec::new();

        for (t, info) in torrents.iter().enumerate() {
            for piece in 0..info.piece_count() {
                let Some(segments) = info.segments(piece) else {
                    continue;
                };
                match presence.precheck(info, t, &segments) {
                    Some(status) => tallies[t].record(piece, status, None),
                    None => work.push((t, piece)),
                }
            }
        }

        debug!("{} pieces to hash with {} workers", work.len(), self.workers);

        self.hash_all(&torrents, root, work, &mut tallies, cancel).await?;

        let reports = entries
            .into_iter()
            .zip(tallies)
            .enumerate()
            .map(|(t, (entry, mut tally))| {
                let info = &entry.info;
                tally.missing.sort_unstable();
                tally.corrupt.sort_unstable();
                tally.read_errors.sort_by_key(|e| e.piece);

                let piece_count = info.piece_count();
                let state = if !presence.has_data(t) {
                    TorrentState::Absent
                } else if tally.counts.verified == piece_count {
                    TorrentState::Complete
                } else {
                    TorrentState::Incomplete
                };

                let missing_files = info
                    .files
                    .iter()
                    .enumerate()
                    .filter(|(f, file)| !file.padding && !presence.is_present(t, *f))
                    .map(|(_, file)| file.relative_path())
                    .collect();

                TorrentReport {
                    info_hash: info.info_hash,
                    name: info.name.clone(),
                    origins: entry.origins,
                    layout: info.layout,
                    file_count: info.files.iter().filter(|f| !f.padding).count(),
                    total_length: info.total_length(),
                    trackers: info.trackers.clone(),
                    piece_count,
                    completion: tally.counts.verified as f64 / piece_count as f64,
                    counts: tally.counts,
                    missing_pieces: tally.missing,
                    corrupt_pieces: tally.corrupt,
                    state,
                    missing_files,
                    read_errors: tally.read_errors,
                }
            })
            .collect::<Vec<_>>();

        // cancelled while building the report
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        for report in &reports {
            debug!(
                "{} {:?}: {}/{} verified",
                report.info_hash,
                report.state,
                report.counts.verified,
                report.piece_count
            );
        }

        Ok(ReconciliationReport {
            root: root.to_path_buf(),
            started_at,
            finished_at: OffsetDateTime::now_utc(),
            torrents: reports,
            files,
            skipped,
            scan_errors,
        })
    }

    /// Walk the tree on a blocking thread.
    async fn scan(
        &self,
        root: &Path,
        cancel: &CancellationToken,
    ) -> Result<(Vec<FileRecord>, Vec<ScanError>), Error> {
        let scanner = self.scanner.clone();
        let root = root.to_path_buf();
        let cancel = cancel.clone();

        let walk = tokio::task::spawn_blocking(move || {
            let mut records = Vec::new();
            let mut errors = Vec::new();

            for item in scanner.scan(&root) {
                if cancel.is_cancelled() {
                    return None;
                }
                match item {
                    Ok(record) => records.push(record),
                    Err(err) => {
                        warn!("could not scan {}: {}", err.path, err.message);
                        errors.push(err);
                    }
                }
            }

            Some((records, errors))
        });

        walk.await
            .map_err(|e| Error::Worker(e.to_string()))?
            .ok_or(Error::Cancelled)
    }

    /// Hash every item of `work` on the worker pool and record the results.
    async fn hash_all(
        &self,
        torrents: &Arc<[Arc<TorrentInfo>]>,
        root: &Path,
        work: Vec<WorkItem>,
        tallies: &mut [Tally],
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let queued = work.len();
        if queued == 0 {
            return Ok(());
        }

        let workers = self.workers.min(queued);
        let (work_tx, work_rx) = mpsc::channel::<WorkItem>(workers * 2);
        let work_rx = Arc::new(Mutex::new(work_rx));
        let (result_tx, mut result_rx) = mpsc::channel::<PieceResult>(workers * 2);
        let root: Arc<Path> = Arc::from(root);

        let mut tasks: JoinSet<Result<(), Error>> = JoinSet::new();

        // producer
        {
            let cancel = cancel.clone();
            tasks.spawn(async move {
                for item in work {
                    select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        sent = work_tx.send(item) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
                Ok(())
            });
        }

        for _ in 0..workers {
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            let torrents = torrents.clone();
            let root = root.clone();
            let hasher = self.hasher.clone();
            let cancel = cancel.clone();

            tasks.spawn(async move {
                loop {
                    let item = {
                        let mut rx = work_rx.lock().await;
                        select! {
                            biased;
                            _ = cancel.cancelled() => None,
                            item = rx.recv() => item,
                        }
                    };
                    let Some((torrent, piece)) = item else {
                        break;
                    };

                    let outcome =
                        hasher.hash_piece(&torrents[torrent], &root, piece).await?;

                    let result = PieceResult { torrent, piece, outcome };
                    if result_tx.send(result).await.is_err() {
                        break;
                    }
                }
                Ok(())
            });
        }

        // only the workers hold senders now, the loop below ends when the
        // last one is done.
        drop(result_tx);

        let mut hashed = 0;
        loop {
            let result = select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.shutdown().await;
                    return Err(Error::Cancelled);
                }
                result = result_rx.recv() => result,
            };
            let Some(result) = result else {
                break;
            };

            hashed += 1;
            let PieceResult { torrent, piece, outcome } = result;
            tallies[torrent].record(piece, outcome.status, outcome.error);

            if let Some(progress) = &self.progress {
                select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tasks.shutdown().await;
                        return Err(Error::Cancelled);
                    }
                    // a closed receiver only means nobody is watching
                    _ = progress.send(Progress { hashed, queued }) => {}
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tasks.shutdown().await;
                    return Err(err);
                }
                Err(err) => {
                    tasks.shutdown().await;
                    return Err(Error::Worker(err.to_string()));
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if hashed != queued {
            return Err(Error::Worker(format!(
                "{hashed} of {queued} pieces were hashed"
            )));
        }

        Ok(())
    }
}

/// Keep the first torrent of every info-hash, and the endpoints of all of
/// them.
fn dedup<'a>(
    torrents: impl IntoIterator<Item = (&'a TorrentInfo, &'a [String])>,
) -> Vec<Entry> {
    let mut seen: HashMap<InfoHash, usize> = HashMap::new();
    let mut entries: Vec<Entry> = Vec::new();

    for (info, origins) in torrents {
        match seen.get(&info.info_hash) {
            Some(&i) => {
                debug!("{} listed more than once", info.info_hash);
                let entry = &mut entries[i];
                for origin in origins {
                    if !entry.origins.contains(origin) {
                        entry.origins.push(origin.clone());
                    }
                }
            }
            None => {
                seen.insert(info.info_hash, entries.len());
                entries.push(Entry {
                    info: Arc::new(info.clone()),
                    origins: origins.to_vec(),
                });
            }
        }
    }

    entries
}
