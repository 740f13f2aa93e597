use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;
use tracing::{debug, info};

use super::declarative::DeclarativeFormatter;
use super::strategy::{FormatError, Formatter};

struct CachedFormatter {
    formatter: Arc<dyn Formatter>,
    /// Definition file and its mtime at load; `None` for pinned formatters
    source: Option<(PathBuf, Option<SystemTime>)>,
}

/// Formatters keyed by `<name>/<version>`.
///
/// Entries loaded from disk are reloaded when the definition file's
/// modification time changes, so formatting edits apply without a restart.
/// The inference service also drops an entry once its model version is gone
/// from disk.
#[derive(Default)]
pub struct FormatterCache {
    entries: RwLock<HashMap<String, CachedFormatter>>,
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

impl FormatterCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the formatter for `key`, loading `path` when the cached copy is stale.
    pub fn get_or_load(&self, key: &str, path: &Path) -> Result<Arc<dyn Formatter>, FormatError> {
        let stamp = modified(path);
        {
            let entries = self.entries.read().map_err(|e| FormatError::Load(e.to_string()))?;
            if let Some(entry) = entries.get(key) {
                match &entry.source {
                    None => return Ok(Arc::clone(&entry.formatter)),
                    Some((cached_path, cached_stamp)) if cached_path == path && *cached_stamp == stamp => {
                        debug!("Formatter for '{}' served from cache", key);
                        return Ok(Arc::clone(&entry.formatter));
                    }
                    Some(_) => {}
                }
            }
        }

        info!("Loading formatter for '{}' from {}", key, path.display());
        let formatter: Arc<dyn Formatter> = Arc::new(DeclarativeFormatter::load(path)?);
        let mut entries = self.entries.write().map_err(|e| FormatError::Load(e.to_string()))?;
        entries.insert(
            key.to_string(),
            CachedFormatter {
                formatter: Arc::clone(&formatter),
                source: Some((path.to_path_buf(), stamp)),
            },
        );
        Ok(formatter)
    }

    /// Installs a formatter that is never reloaded from disk
    pub fn pin(&self, key: &str, formatter: Arc<dyn Formatter>) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key.to_string(), CachedFormatter { formatter, source: None });
        }
    }

    /// Drops the cached formatter for `key`; returns whether one was cached
    pub fn invalidate(&self, key: &str) -> bool {
        self.entries
            .write()
            .map(|mut entries| entries.remove(key).is_some())
            .unwrap_or(false)
    }
}
