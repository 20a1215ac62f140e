//! A library to reconcile local datasets against BitTorrent metadata.
//!
//! Given the torrents known by one or more endpoints (torrent clients, or
//! the directories where they keep their `.torrent` files) and a directory
//! tree, it tells which local files belong to a torrent, which pieces are
//! verified, corrupt or missing, and which torrents have no data on disk at
//! all.
//!
//! This crate only parses static metadata and reads files already on disk,
//! it never talks to peers or trackers.
//!
//! # Example
//!
//! ```no_run
//! use tarc::{
//!     reconcile::Reconciler,
//!     source::{Catalog, TorrentDir},
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), tarc::error::Error> {
//! let catalog =
//!     Catalog::gather(&[TorrentDir::new("home", "/var/lib/torrents")]).await?;
//!
//! let report = Reconciler::new()
//!     .reconcile_catalog(&catalog, "/srv/datasets", &CancellationToken::new())
//!     .await?;
//!
//! for torrent in report.absent() {
//!     println!("{} has no data on disk", torrent.name);
//! }
//! # Ok(())
//! # }
//! ```

pub mod bencode;
pub mod config;
pub mod error;
pub mod hasher;
pub mod metainfo;
pub mod reconcile;
pub mod scanner;
pub mod source;
pub mod utils;
