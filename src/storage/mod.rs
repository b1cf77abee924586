use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::error::{AggregatorError, Result};

/// Metadata for one stored object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub namespace: String,
    pub key: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// Persistence collaborator consuming orchestration records.
///
/// One record is written per backend attempt plus one consolidated record
/// per run, each tagged with source metadata by the caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn store(&self, namespace: &str, key: &str, payload: Value) -> Result<()>;
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;
    async fn load(&self, namespace: &str, limit: usize) -> Result<Vec<Value>>;
}

/// Filesystem-backed object store: one directory per namespace, one JSON
/// document per key.
pub struct FileObjectStore {
    root: PathBuf,
}

impl FileObjectStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    // object keys may carry characters the filesystem dislikes
    fn sanitize_key(key: &str) -> String {
        key.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.root.join(Self::sanitize_key(namespace))
    }
}

#[async_trait]
impl ObjectStore for FileObjectStore {
    async fn store(&self, namespace: &str, key: &str, payload: Value) -> Result<()> {
        let dir = self.namespace_dir(namespace);
        fs::create_dir_all(&dir).map_err(|e| {
            AggregatorError::PersistenceWrite(format!("Failed to create {}: {}", dir.display(), e))
        })?;

        let path = dir.join(format!("{}.json", Self::sanitize_key(key)));
        let content = serde_json::to_string_pretty(&payload).map_err(|e| {
            AggregatorError::PersistenceWrite(format!("Failed to serialize payload: {}", e))
        })?;

        fs::write(&path, content).map_err(|e| {
            AggregatorError::PersistenceWrite(format!("Failed to write {}: {}", path.display(), e))
        })?;

        debug!("Stored object {}/{}", namespace, key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let mut objects = Vec::new();

        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(_) => return Ok(objects), // nothing stored yet
        };

        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let namespace = entry.file_name().to_string_lossy().to_string();
            if !namespace.starts_with(prefix) {
                continue;
            }

            if let Ok(files) = fs::read_dir(entry.path()) {
                for file in files.flatten() {
                    if !file.path().is_file() {
                        continue;
                    }
                    if let Ok(metadata) = file.metadata() {
                        let created_at = metadata
                            .created()
                            .or_else(|_| metadata.modified())
                            .map(DateTime::<Utc>::from)
                            .unwrap_or_else(|_| Utc::now());

                        let key = file
                            .path()
                            .file_stem()
                            .map(|s| s.to_string_lossy().to_string())
                            .unwrap_or_default();

                        objects.push(ObjectMeta {
                            namespace: namespace.clone(),
                            key,
                            size: metadata.len(),
                            created_at,
                        });
                    }
                }
            }
        }

        Ok(objects)
    }

    async fn load(&self, namespace: &str, limit: usize) -> Result<Vec<Value>> {
        let dir = self.namespace_dir(namespace);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(Vec::new()),
        };

        // most recent documents first
        let mut files: Vec<(DateTime<Utc>, PathBuf)> = Vec::new();
        for entry in entries.flatten() {
            if !entry.path().is_file() {
                continue;
            }
            if let Ok(metadata) = entry.metadata() {
                let modified = metadata
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                files.push((modified, entry.path()));
            }
        }
        files.sort_by(|a, b| b.0.cmp(&a.0));

        let mut payloads = Vec::new();
        for (_, path) in files.into_iter().take(limit) {
            match fs::read_to_string(&path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(value) => payloads.push(value),
                    Err(e) => warn!("Skipping unparseable object {}: {}", path.display(), e),
                },
                Err(e) => warn!("Skipping unreadable object {}: {}", path.display(), e),
            }
        }

        info!("Loaded {} objects from namespace {}", payloads.len(), namespace);
        Ok(payloads)
    }
}
