//! File-backed cache of typed payloads.
//!
//! One file per key under `<xfer root>/tmp/cache`, named by the URL-safe
//! base64 encoding of the key, so keys are limited to [`MAX_KEY_LEN`] bytes
//! to keep file names within 255 bytes. Each file holds a serialized [`CacheItem`]
//! carrying the packed payload and its expiry. Expired records are removed
//! lazily on read and in bulk by [`CacheStore::sweep_expired`].

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use prost::Message;
use tracing::{debug, info, warn};

use crate::payload::{self, Payload};
use crate::proto::{CacheItem, RequestHeader};
use crate::{timestamp, CoreError, Result};

/// Longest key, in UTF-8 bytes, whose encoded file name fits in 255 bytes.
pub const MAX_KEY_LEN: usize = 191;

pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    /// Opens (creating if needed) the cache under `xfer_root/tmp/cache`.
    pub fn open<P: AsRef<Path>>(xfer_root: P) -> Result<Self> {
        let dir = xfer_root.as_ref().join("tmp").join("cache");
        fs::create_dir_all(&dir)?;
        info!(dir = %dir.display(), "Cache initialized");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stores `item` under `name`; `None` never expires.
    pub fn save<T: Payload>(
        &self,
        name: &str,
        item: &T,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<CacheItem> {
        let path = self.path_for(name)?;
        let tracking_id = payload::new_tracking_id();
        let record = CacheItem {
            request_header: Some(RequestHeader {
                correlation_id: tracking_id.clone(),
                tracking_id,
                ..Default::default()
            }),
            name: name.to_string(),
            item: Some(payload::pack(item)),
            creation_time: Some(timestamp::now()),
            expiration_time: Some(
                expires_at
                    .map(timestamp::to_timestamp)
                    .unwrap_or_else(timestamp::max_timestamp),
            ),
        };

        fs::write(&path, record.encode_to_vec())?;
        debug!(name, message_type = T::TYPE_NAME, "Cache item saved");
        Ok(record)
    }

    /// The payload stored under `name`, or `None` when missing or expired.
    ///
    /// Reading an expired record deletes it.
    pub fn get<T: Payload>(&self, name: &str) -> Result<Option<T>> {
        let path = self.path_for(name)?;
        let Some(record) = read_record(&path)? else {
            return Ok(None);
        };

        if is_expired(&record, Utc::now()) {
            debug!(name, "Cache item expired");
            remove_quietly(&path)?;
            return Ok(None);
        }

        let item = record
            .item
            .ok_or_else(|| CoreError::Cache(format!("cache record '{name}' has no payload")))?;
        payload::unpack(&item).map(Some)
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        let path = self.path_for(name)?;
        remove_quietly(&path)
    }

    /// Names of every unexpired record; expired ones are swept first.
    pub fn list(&self) -> Result<Vec<String>> {
        self.sweep_expired()?;

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let file_name = entry?.file_name();
            let Some(encoded) = file_name.to_str() else {
                continue;
            };
            match decode_key(encoded) {
                Some(name) => names.push(name),
                None => warn!(file = encoded, "Skipping unrecognised cache file"),
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn clear(&self) -> Result<()> {
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() {
                remove_quietly(&path)?;
            }
        }
        info!("Cache cleared");
        Ok(())
    }

    /// Deletes every expired record; returns how many.
    ///
    /// Unreadable records are logged and left in place.
    pub fn sweep_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut removed = 0;

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            match read_record(&path) {
                Ok(Some(record)) if is_expired(&record, now) => {
                    remove_quietly(&path)?;
                    removed += 1;
                }
                Ok(_) => {}
                Err(e) => warn!(file = %path.display(), error = %e, "Unreadable cache record"),
            }
        }

        if removed > 0 {
            debug!(removed, "Expired cache items removed");
        }
        Ok(removed)
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() {
            return Err(CoreError::Cache("cache key must not be empty".into()));
        }
        if name.len() > MAX_KEY_LEN {
            return Err(CoreError::Cache(format!(
                "cache key is {} bytes; the limit is {MAX_KEY_LEN}",
                name.len()
            )));
        }
        Ok(self.dir.join(encode_key(name)))
    }
}

fn encode_key(name: &str) -> String {
    URL_SAFE_NO_PAD.encode(name.as_bytes())
}

fn decode_key(encoded: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
    String::from_utf8(bytes).ok()
}

fn read_record(path: &Path) -> Result<Option<CacheItem>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(CacheItem::decode(bytes.as_slice())?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn remove_quietly(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn is_expired(record: &CacheItem, now: DateTime<Utc>) -> bool {
    match record
        .expiration_time
        .as_ref()
        .and_then(timestamp::from_timestamp)
    {
        Some(expires_at) => expires_at <= now,
        None => false,
    }
}
