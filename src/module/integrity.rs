//! The `source.json` integrity record and digest helpers.
//!
//! Bazel's module registry verifies an archive against the `integrity` field
//! (`sha256-<base64>`) before trusting it, so the record is only ever written
//! from a digest computed over the archive that was just built.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

const INTEGRITY_PREFIX: &str = "sha256-";

/// Errors reading, writing or checking a record.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("{action} '{path}': {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parsing integrity record '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("integrity field '{0}' is not of the form sha256-<base64>")]
    MalformedIntegrity(String),
}

/// `source.json` contents, field names as the registry expects them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub url: String,
    pub integrity: String,
    #[serde(default)]
    pub strip_prefix: String,
    #[serde(default)]
    pub patches: Vec<String>,
    #[serde(default)]
    pub patch_strip: u32,
}

impl SourceRecord {
    /// Record for a local archive with no nesting prefix and no patches.
    pub fn for_archive(archive: &Path, digest_base64: &str) -> Self {
        Self {
            url: format!("file://{}", archive.display()),
            integrity: format!("{INTEGRITY_PREFIX}{digest_base64}"),
            strip_prefix: String::new(),
            patches: Vec::new(),
            patch_strip: 0,
        }
    }

    /// The base64 digest without its algorithm prefix.
    pub fn digest_base64(&self) -> Result<&str, RecordError> {
        self.integrity
            .strip_prefix(INTEGRITY_PREFIX)
            .filter(|digest| is_sha256_base64(digest))
            .ok_or_else(|| RecordError::MalformedIntegrity(self.integrity.clone()))
    }

    /// Archive path for `file://` URLs.
    pub fn archive_path(&self) -> Option<PathBuf> {
        self.url.strip_prefix("file://").map(PathBuf::from)
    }

    pub fn read(path: &Path) -> Result<Self, RecordError> {
        let bytes = fs::read(path).map_err(|source| RecordError::Io {
            action: "reading integrity record",
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| RecordError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the record, replacing any previous one.
    ///
    /// The JSON goes to a sibling temp file first and is renamed into place,
    /// so readers never observe a half-written record.
    pub fn write(&self, path: &Path) -> Result<(), RecordError> {
        let io_err = |action: &'static str, path: &Path| {
            let path = path.to_path_buf();
            move |source: io::Error| RecordError::Io {
                action,
                path,
                source,
            }
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err("creating registry module dir", parent))?;
        }

        let mut bytes = serde_json::to_vec_pretty(self).map_err(|source| RecordError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        bytes.push(b'\n');

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &bytes).map_err(io_err("writing integrity record", &tmp))?;
        fs::rename(&tmp, path).map_err(io_err("replacing integrity record", path))?;
        Ok(())
    }
}

/// Outcome of re-hashing an archive against its record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub archive: PathBuf,
    pub expected: String,
    pub actual: String,
}

impl Verification {
    pub fn matches(&self) -> bool {
        self.expected == self.actual
    }
}

/// Recompute the digest of `archive` and compare it with `record`.
pub fn verify_archive(record: &SourceRecord, archive: &Path) -> Result<Verification, RecordError> {
    let expected = record.digest_base64()?.to_string();
    let actual = sha256_base64_file(archive).map_err(|source| RecordError::Io {
        action: "hashing archive",
        path: archive.to_path_buf(),
        source,
    })?;
    Ok(Verification {
        archive: archive.to_path_buf(),
        expected,
        actual,
    })
}

/// Streaming SHA-256 of a file.
pub fn sha256_file(path: &Path) -> io::Result<[u8; 32]> {
    let f = File::open(path)?;
    let mut r = BufReader::new(f);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = r.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

/// SHA-256 of a file, base64 encoded (standard alphabet, padded).
pub fn sha256_base64_file(path: &Path) -> io::Result<String> {
    Ok(STANDARD.encode(sha256_file(path)?))
}

/// Whether `s` is a padded base64 encoding of exactly 32 bytes.
pub fn is_sha256_base64(s: &str) -> bool {
    STANDARD
        .decode(s)
        .map(|bytes| bytes.len() == 32)
        .unwrap_or(false)
}
