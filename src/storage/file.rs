//! Flat-file persistence backend.
//!
//! Stores the whole credential store as one little-endian binary file
//! (see [`super::codec`]). The write path is all-or-nothing: the file is
//! written in a single operation and read back to verify, so a failed
//! write never leaves a half-written store that later loads as valid.

use log::{debug, warn};
use std::fs;
use std::io;
use std::path::PathBuf;

use super::codec::{decode_record, encode_record, ByteReader, ByteWriter};
use super::{StorageBackend, StorageError};
use crate::creds::{CredentialRecord, MAX_CREDENTIALS};

/// Credential store backend over a flat binary file.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    /// Create a backend for the given file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file path.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn save(&mut self, records: &[CredentialRecord]) -> Result<(), StorageError> {
        let mut writer = ByteWriter::new();
        writer.push_u8(records.len().min(MAX_CREDENTIALS) as u8);
        for record in records.iter().take(MAX_CREDENTIALS) {
            encode_record(record, &mut writer);
        }
        let bytes = writer.into_inner();

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, &bytes)?;

        // Read back to catch silent write failures.
        let read_back = fs::read(&self.path)?;
        if read_back != bytes {
            return Err(StorageError::Backend(
                "read-back mismatch after save".to_string(),
            ));
        }

        debug!("saved {} credential(s) to {:?}", records.len(), self.path);
        Ok(())
    }

    fn load(&mut self) -> Result<Vec<CredentialRecord>, StorageError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("no credential file at {:?}", self.path);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut reader = ByteReader::new(&bytes);
        let count = reader
            .read_u8()
            .ok_or(StorageError::Corrupted("missing record count"))?;

        let mut records = Vec::new();
        for _ in 0..count {
            if records.len() == MAX_CREDENTIALS {
                warn!(
                    "credential file holds more than {} records; truncating",
                    MAX_CREDENTIALS
                );
                break;
            }
            match decode_record(&mut reader) {
                Some(record) => records.push(record),
                None => {
                    warn!(
                        "incomplete credential record in {:?}; keeping {} loaded",
                        self.path,
                        records.len()
                    );
                    if records.is_empty() {
                        return Err(StorageError::Corrupted("no complete record"));
                    }
                    break;
                }
            }
        }

        Ok(records)
    }
}
