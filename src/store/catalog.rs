// Version catalog
//
// Layout: versions/<version>/{<artifact>, info.json}. "Latest" is derived
// from the directory contents on every call, never stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::persist::{read_json, write_json_atomic, Loaded};
use super::versioning::{compare_versions, validate_version};
use crate::config::constants::VERSION_INFO_FILE;
use crate::errors::StoreError;

/// Metadata for one published version (`info.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub filename: String,
    /// Hex sha256 of the stored artifact.
    pub file_hash: String,
    #[serde(default)]
    pub description: String,
    #[serde(deserialize_with = "crate::messages::timestamp_de")]
    pub publish_time: DateTime<Utc>,
}

/// A stored artifact ready to be streamed.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub info: VersionInfo,
    pub path: PathBuf,
    pub size: u64,
}

pub struct VersionCatalog {
    versions_dir: PathBuf,
    /// Serialises publishes so two writers never interleave in one version dir.
    publish_lock: Mutex<()>,
}

impl VersionCatalog {
    pub fn open(versions_dir: PathBuf) -> Result<Self, StoreError> {
        fs::create_dir_all(&versions_dir).map_err(|e| StoreError::io(&versions_dir, e))?;
        Ok(Self {
            versions_dir,
            publish_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.versions_dir
    }

    /// Copy `source` into `versions/<version>/`, hash it and write `info.json`.
    ///
    /// Publishing an existing version replaces its artifact and metadata.
    pub fn publish(
        &self,
        version: &str,
        source: &Path,
        description: &str,
    ) -> Result<VersionInfo, StoreError> {
        validate_version(version)?;

        let filename = source
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| *n != VERSION_INFO_FILE)
            .ok_or_else(|| StoreError::not_found(format!("artifact file {}", source.display())))?
            .to_string();

        if !source.is_file() {
            return Err(StoreError::not_found(format!(
                "artifact file {}",
                source.display()
            )));
        }

        let _guard = self
            .publish_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let version_dir = self.versions_dir.join(version);
        fs::create_dir_all(&version_dir).map_err(|e| StoreError::io(&version_dir, e))?;

        if let Some(previous) = self.info(version) {
            if previous.filename != filename {
                let stale = version_dir.join(&previous.filename);
                if let Err(e) = fs::remove_file(&stale) {
                    tracing::warn!(path = %stale.display(), error = %e, "Could not remove replaced artifact");
                }
            }
            tracing::warn!(version, "Re-publishing existing version");
        }

        let dest = version_dir.join(&filename);
        let file_hash = copy_and_hash(source, &dest).map_err(|e| StoreError::io(&dest, e))?;

        let info = VersionInfo {
            version: version.to_string(),
            filename,
            file_hash,
            description: description.to_string(),
            publish_time: Utc::now(),
        };

        let info_path = version_dir.join(VERSION_INFO_FILE);
        write_json_atomic(&info_path, &info).map_err(|e| StoreError::io(&info_path, e))?;

        tracing::info!(version, filename = %info.filename, hash = %info.file_hash, "Published version");
        Ok(info)
    }

    /// Metadata for `version`; `None` when unknown, invalid or unreadable.
    pub fn info(&self, version: &str) -> Option<VersionInfo> {
        validate_version(version).ok()?;
        let path = self.versions_dir.join(version).join(VERSION_INFO_FILE);
        match read_json::<VersionInfo>(&path) {
            Loaded::Ok(info) => Some(info),
            Loaded::Missing => None,
            Loaded::Corrupt(reason) => {
                tracing::warn!(path = %path.display(), %reason, "Ignoring unreadable version info");
                None
            }
        }
    }

    /// Every published version, newest first.
    pub fn list(&self) -> Vec<VersionInfo> {
        let entries = match fs::read_dir(&self.versions_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %self.versions_dir.display(), error = %e, "Cannot list versions");
                return Vec::new();
            }
        };

        let mut versions: Vec<VersionInfo> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter_map(|name| self.info(&name))
            .collect();
        versions.sort_by(|a, b| compare_versions(&b.version, &a.version));
        versions
    }

    pub fn latest(&self) -> Option<VersionInfo> {
        self.list().into_iter().next()
    }

    /// Locate the stored artifact for `version`.
    pub fn artifact(&self, version: &str) -> Result<Artifact, StoreError> {
        let info = self
            .info(version)
            .ok_or_else(|| StoreError::not_found(format!("version {version}")))?;
        let path = self.versions_dir.join(version).join(&info.filename);
        let size = match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return Err(StoreError::not_found(format!("artifact for version {version}"))),
        };
        Ok(Artifact { info, path, size })
    }
}

/// Streaming copy that returns the hex sha256 of the bytes written.
fn copy_and_hash(source: &Path, dest: &Path) -> io::Result<String> {
    let mut input = File::open(source)?;
    let mut output = File::create(dest)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        output.write_all(&buf[..n])?;
    }
    output.sync_all()?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Hex sha256 of a file on disk.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut input = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
