use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Tarc(#[from] tarc::error::Error),

    #[error("`{0}` is not a directory")]
    NotADirectory(PathBuf),

    #[error(
        "No endpoints to read torrents from. Pass a directory of .torrent \
         files with --torrents, or add [[endpoints]] to the config file."
    )]
    NoEndpoints,

    #[error("Could not setup logging: {0}")]
    Logging(String),

    #[error("Could not write the report: {0}")]
    Output(#[from] std::io::Error),

    #[error("Could not serialize the report: {0}")]
    Json(#[from] serde_json::Error),
}
