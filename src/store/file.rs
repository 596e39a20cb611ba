use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{LinkStore, StoreError};
use crate::model::{ClickStats, Link, normalized_id};

const STATS_FILE: &str = "stats.json";

/// FileStore keeps one JSON document per link in a directory, plus running
/// click totals in a single stats.json. A fallback and test fixture; the
/// SQLite store is the production backend.
#[derive(Clone)]
pub struct FileStore {
    dir: PathBuf,
    // one guard for the whole directory; concurrent writes to the same link
    // would otherwise race last-writer-wins
    lock: Arc<Mutex<()>>,
}

/// Escapes a normalized id for use as a file name. Periods get a second
/// round of escaping so no id ever produces a dotfile.
fn file_name(id: &str) -> String {
    id.replace('.', "%2e")
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(StoreError::backend)?;
        Ok(Self {
            dir,
            lock: Arc::new(Mutex::new(())),
        })
    }

    fn link_path(&self, short: &str) -> PathBuf {
        self.dir.join(file_name(&normalized_id(short)))
    }

    fn read_link(path: &Path) -> Result<Link, StoreError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(StoreError::NotFound),
            Err(e) => return Err(StoreError::backend(e)),
        };
        serde_json::from_str(&contents).map_err(StoreError::backend)
    }

    // write to a sibling temp file and rename into place so a failed write
    // never clobbers the existing record
    fn write_file(path: &Path, contents: &str) -> Result<(), StoreError> {
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, contents).map_err(StoreError::backend)?;
        std::fs::rename(&tmp, path).map_err(StoreError::backend)
    }

    fn scan_links(&self) -> Result<Vec<Link>, StoreError> {
        let mut links = Vec::new();
        for entry in std::fs::read_dir(&self.dir).map_err(StoreError::backend)? {
            let entry = entry.map_err(StoreError::backend)?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == STATS_FILE || name.ends_with(".tmp") {
                continue;
            }
            links.push(Self::read_link(&entry.path())?);
        }
        Ok(links)
    }

    fn read_stats(&self) -> Result<HashMap<String, i64>, StoreError> {
        match std::fs::read_to_string(self.dir.join(STATS_FILE)) {
            Ok(contents) => serde_json::from_str(&contents).map_err(StoreError::backend),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(StoreError::backend(e)),
        }
    }

    fn write_stats(&self, totals: &HashMap<String, i64>) -> Result<(), StoreError> {
        let contents = serde_json::to_string_pretty(totals).map_err(StoreError::backend)?;
        Self::write_file(&self.dir.join(STATS_FILE), &contents)
    }
}

#[async_trait]
impl LinkStore for FileStore {
    async fn load_all(&self) -> Result<Vec<Link>, StoreError> {
        let _guard = self.lock.lock().await;
        self.scan_links()
    }

    async fn load(&self, short: &str) -> Result<Link, StoreError> {
        let _guard = self.lock.lock().await;
        Self::read_link(&self.link_path(short))
    }

    async fn save(&self, link: &Link) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let contents = serde_json::to_string_pretty(link).map_err(StoreError::backend)?;
        Self::write_file(&self.link_path(&link.short), &contents)
    }

    async fn delete(&self, short: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        match std::fs::remove_file(self.link_path(short)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(e) => Err(StoreError::backend(e)),
        }
    }

    async fn load_stats(&self) -> Result<ClickStats, StoreError> {
        let _guard = self.lock.lock().await;
        let canonical: HashMap<String, String> = self
            .scan_links()?
            .into_iter()
            .map(|link| (normalized_id(&link.short), link.short))
            .collect();

        let mut stats = ClickStats::new();
        for (id, clicks) in self.read_stats()? {
            let short = canonical.get(&id).cloned().unwrap_or(id);
            stats.insert(short, clicks);
        }
        Ok(stats)
    }

    async fn save_stats(&self, delta: &ClickStats) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut totals = self.read_stats()?;
        for (short, clicks) in delta {
            *totals.entry(normalized_id(short)).or_insert(0) += clicks;
        }
        self.write_stats(&totals)
    }

    async fn delete_stats(&self, short: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut totals = self.read_stats()?;
        if totals.remove(&normalized_id(short)).is_some() {
            self.write_stats(&totals)?;
        }
        Ok(())
    }
}
