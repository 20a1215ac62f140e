use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::{error::Error, source::TorrentDir};

/// A named directory of `.torrent` files.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub name: String,
    pub torrents_dir: PathBuf,
}

impl EndpointConfig {
    pub fn source(&self) -> TorrentDir {
        TorrentDir::new(&self.name, &self.torrents_dir)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Pieces hashed at the same time, defaults to the available
    /// parallelism.
    pub workers: Option<usize>,
    pub skip_hidden: bool,
    /// Also write logs to a file in the data directory.
    pub log: bool,
    pub endpoints: Vec<EndpointConfig>,
}

/// Directory of the configuration file, from the user's home.
pub fn config_dir() -> Result<PathBuf, Error> {
    let dirs = ProjectDirs::from("", "", "tarc").ok_or(Error::HomeInvalid)?;
    Ok(dirs.config_dir().to_path_buf())
}

/// Where log files go.
pub fn data_dir() -> Result<PathBuf, Error> {
    let dirs = ProjectDirs::from("", "", "tarc").ok_or(Error::HomeInvalid)?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

impl Config {
    /// Load `config.toml` from the user's config folder. If the file does
    /// not exist the defaults are used, nothing is created.
    ///
    /// # Errors
    ///
    /// If the home folder cannot be found, or the file exists but is not a
    /// valid configuration.
    pub async fn load() -> Result<Self, Error> {
        let path = config_dir()?.join("config.toml");
        if !tokio::fs::try_exists(&path).await? {
            return Ok(Self::default());
        }
        Self::load_from(path).await
    }

    /// Load a configuration file at a given path, which must exist.
    pub async fn load_from(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let s = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::ConfigError(format!("could not read {path:?}: {e}"))
        })?;
        Self::from_toml(&s)
    }

    pub fn from_toml(s: &str) -> Result<Self, Error> {
        let config = toml::from_str::<Config>(s)
            .map_err(|e| Error::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.workers == Some(0) {
            return Err(Error::ConfigError(
                "`workers` must be greater than zero".to_owned(),
            ));
        }
        for (i, endpoint) in self.endpoints.iter().enumerate() {
            if endpoint.name.is_empty() {
                return Err(Error::ConfigError(format!(
                    "endpoint {i} has an empty name"
                )));
            }
            if self.endpoints[..i].iter().any(|e| e.name == endpoint.name) {
                return Err(Error::ConfigError(format!(
                    "endpoint `{}` is declared twice",
                    endpoint.name
                )));
            }
        }
        Ok(())
    }

    pub fn workers(&self) -> usize {
        self.workers.unwrap_or_else(default_workers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        let config = Config::from_toml(
            r#"
            workers = 4
            skip_hidden = true

            [[endpoints]]
            name = "home"
            torrents_dir = "/var/lib/torrents"

            [[endpoints]]
            name = "seedbox"
            torrents_dir = "/mnt/seedbox/session"
            "#,
        )
        .unwrap();

        assert_eq!(config.workers(), 4);
        assert!(config.skip_hidden);
        assert!(!config.log);
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.endpoints[1].name, "seedbox");
        assert_eq!(config.endpoints[1].source().dir(), Path::new("/mnt/seedbox/session"));
    }

    #[test]
    fn empty_is_default() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.workers() >= 1);
    }

    #[test]
    fn invalid() {
        assert!(matches!(
            Config::from_toml("workers = 0"),
            Err(Error::ConfigError(_))
        ));
        assert!(matches!(
            Config::from_toml("workers = \"many\""),
            Err(Error::ConfigError(_))
        ));
        let dup = r#"
            [[endpoints]]
            name = "a"
            torrents_dir = "/a"
            [[endpoints]]
            name = "a"
            torrents_dir = "/b"
        "#;
        assert!(matches!(Config::from_toml(dup), Err(Error::ConfigError(_))));
    }

    #[tokio::test]
    async fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "log = true").await.unwrap();

        let config = Config::load_from(&path).await.unwrap();
        assert!(config.log);

        assert!(Config::load_from(dir.path().join("nope.toml")).await.is_err());
    }
}
