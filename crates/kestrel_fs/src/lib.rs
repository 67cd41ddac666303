//! # Kestrel FileSystem Storage
//!
//! A local filesystem backend for Kestrel.
//!
//! This crate implements the [`StorageBackend`] trait, keeping drained job outputs
//! in a directory and handing out `/tmp/<name>` references the server can serve back.
//!
//! ## Features
//!
//! * **Atomic Writes**: Uses temporary files and rename operations so a half-written output is never served.
//!
//! ## Usage
//!
//! ```no_run
//! use kestrel_fs::FileSystemStorage;
//!
//! let storage = FileSystemStorage::new("./public/tmp");
//! ```

use kestrel_core::prelude::*;

use bytes::Bytes;
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

async fn atomic_write(path: &std::path::Path, data: Bytes) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(StorageError::Io)?;
    }

    let tmp_path = path.with_extension("part");

    fs::write(&tmp_path, data).await.map_err(StorageError::Io)?;
    fs::rename(&tmp_path, path)
        .await
        .map_err(StorageError::Io)?;

    Ok(())
}

#[derive(Clone, Debug)]
pub struct FileSystemStorage {
    root: PathBuf,
}

impl FileSystemStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { root: path.into() }
    }

    fn get_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        let valid = !name.is_empty()
            && !name.contains(['/', '\\'])
            && name != "."
            && !name.contains("..");

        if !valid {
            return Err(StorageError::InvalidRequest(format!(
                "Invalid output name '{name}'"
            )));
        }

        Ok(self.root.join(name))
    }
}

impl StorageBackend for FileSystemStorage {
    async fn write_output(&self, name: &str, data: Bytes) -> Result<OutputReference, StorageError> {
        let path = self.get_path(name)?;
        atomic_write(&path, data).await?;
        debug!("Wrote output {}", path.display());
        Ok(OutputReference::new(format!("{}/{name}", routes::OUTPUTS)))
    }

    async fn read_file(&self, name: &str) -> Result<Bytes, StorageError> {
        let path = self.get_path(name)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(name.to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn local_name<'a>(&self, reference: &'a str) -> Option<&'a str> {
        reference
            .strip_prefix(routes::OUTPUTS)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|name| !name.is_empty())
    }
}
