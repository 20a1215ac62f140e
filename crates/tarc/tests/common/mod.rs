//! Helpers shared by the integration tests.
//!
//! Tests build their torrents out of in-memory files, so the expected piece
//! hashes are always those of the bytes the test wrote (or chose not to
//! write) under a temporary root.
#![allow(dead_code)]

use std::{collections::BTreeMap, fs, path::Path};

use rand::RngCore;
use tarc::{
    bencode::{self, Value},
    metainfo::TorrentInfo,
};

/// Random payload of `len` bytes.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Write `bytes` at `root/rel`, creating the parent directories.
pub fn write(root: &Path, rel: &str, bytes: &[u8]) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, bytes).unwrap();
}

struct TestFile {
    path: String,
    bytes: Vec<u8>,
    padding: bool,
}

/// Build the metainfo of a torrent, and the tree it describes.
pub struct TorrentBuilder {
    name: String,
    piece_length: usize,
    multi: bool,
    files: Vec<TestFile>,
}

impl TorrentBuilder {
    /// A torrent with a single file called `name`.
    pub fn single(name: &str, bytes: Vec<u8>, piece_length: usize) -> Self {
        Self {
            name: name.to_owned(),
            piece_length,
            multi: false,
            files: vec![TestFile { path: name.to_owned(), bytes, padding: false }],
        }
    }

    /// A torrent with a root folder called `name`.
    pub fn multi(name: &str, piece_length: usize) -> Self {
        Self { name: name.to_owned(), piece_length, multi: true, files: Vec::new() }
    }

    /// Add a file, `path` is relative to the torrent folder.
    pub fn file(mut self, path: &str, bytes: Vec<u8>) -> Self {
        self.files.push(TestFile { path: path.to_owned(), bytes, padding: false });
        self
    }

    /// Add a BEP 47 pad file of `len` zeros.
    pub fn pad(mut self, len: usize) -> Self {
        self.files.push(TestFile {
            path: format!(".pad/{len}"),
            bytes: vec![0u8; len],
            padding: true,
        });
        self
    }

    /// Path of a file relative to the scan root.
    pub fn path_of(&self, path: &str) -> String {
        if self.multi {
            format!("{}/{path}", self.name)
        } else {
            self.name.clone()
        }
    }

    pub fn bytes_of(&self, path: &str) -> &[u8] {
        &self.files.iter().find(|f| f.path == path).unwrap().bytes
    }

    /// Write every non padding file under `root`.
    pub fn write_all(&self, root: &Path) {
        for file in self.files.iter().filter(|f| !f.padding) {
            write(root, &self.path_of(&file.path), &file.bytes);
        }
    }

    pub fn bencode(&self) -> Vec<u8> {
        let stream: Vec<u8> =
            self.files.iter().flat_map(|f| f.bytes.iter().copied()).collect();

        let pieces: Vec<u8> = stream
            .chunks(self.piece_length)
            .flat_map(|chunk| {
                let mut hasher = sha1_smol::Sha1::new();
                hasher.update(chunk);
                hasher.digest().bytes()
            })
            .collect();

        let mut info = BTreeMap::new();
        info.insert(b"name".to_vec(), Value::from(self.name.as_str()));
        info.insert(b"piece length".to_vec(), Value::Int(self.piece_length as i64));
        info.insert(b"pieces".to_vec(), Value::Bytes(pieces));

        if self.multi {
            let files = self
                .files
                .iter()
                .map(|f| {
                    let mut file = BTreeMap::new();
                    file.insert(b"length".to_vec(), Value::Int(f.bytes.len() as i64));
                    file.insert(
                        b"path".to_vec(),
                        Value::List(f.path.split('/').map(Value::from).collect()),
                    );
                    if f.padding {
                        file.insert(b"attr".to_vec(), Value::from("p"));
                    }
                    Value::Dict(file)
                })
                .collect();
            info.insert(b"files".to_vec(), Value::List(files));
        } else {
            info.insert(b"length".to_vec(), Value::Int(stream.len() as i64));
        }

        let mut meta = BTreeMap::new();
        meta.insert(b"announce".to_vec(), Value::from("udp://tracker.example:1337"));
        meta.insert(b"info".to_vec(), Value::Dict(info));
        bencode::encode(&Value::Dict(meta)).unwrap()
    }

    pub fn build(&self) -> TorrentInfo {
        TorrentInfo::from_bytes(&self.bencode()).unwrap()
    }
}
